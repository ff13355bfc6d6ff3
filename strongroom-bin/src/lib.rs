pub mod node_ctl;
