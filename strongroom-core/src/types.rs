#[cfg(feature = "crypto")]
use std::{convert::TryFrom, ops::Deref};
use std::{fmt, hash::Hash as StdHash, str::FromStr};

use serde::{Deserialize, Serialize};
#[cfg(feature = "crypto")]
use sha3::{Digest, Sha3_256};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, StdHash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            /// Raw 16 byte representation, used when binding ids into associated data
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(val: Uuid) -> $name {
                $name(val)
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;
            fn from_str(val: &str) -> anyhow::Result<$name> {
                Ok($name(Uuid::parse_str(val)?))
            }
        }
    };
}

uuid_id!(
    /// The tenant a request was authenticated for, resolved upstream of the barrier
    TenantId
);

uuid_id!(
    /// Identifier of a tenant facing elastic key
    ElasticKeyId
);

uuid_id!(
    /// Identifier of a tenant scoped intermediate key
    IntermediateKeyId
);

/// Used to represent a 'hash' of data, useful because of its fmt and sea_orm impls
#[cfg(feature = "crypto")]
#[derive(Clone, PartialEq, Eq, StdHash, Deserialize, Serialize)]
pub struct Hash(pub [u8; 32]);

#[cfg(feature = "crypto")]
impl Hash {
    /// Create a new empty hash
    pub fn new() -> Self {
        Hash([0; 32])
    }

    /// Sha3-256 over the concatenation of `parts`
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_256::new();
        for part in parts {
            hasher.update(part);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&hasher.finalize());
        Hash(buf)
    }
}

#[cfg(feature = "crypto")]
impl Default for Hash {
    fn default() -> Self {
        Hash::new()
    }
}

#[cfg(feature = "crypto")]
impl Deref for Hash {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        let Hash(inner) = self;
        &inner[..]
    }
}

#[cfg(feature = "crypto")]
impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(feature = "crypto")]
impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", bs58::encode(self).into_string())
    }
}

#[cfg(feature = "crypto")]
impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", bs58::encode(self).into_string())
    }
}

#[cfg(feature = "crypto")]
impl From<[u8; 32]> for Hash {
    fn from(val: [u8; 32]) -> Hash {
        Hash(val)
    }
}

#[cfg(feature = "crypto")]
impl TryFrom<Vec<u8>> for Hash {
    type Error = anyhow::Error;
    fn try_from(val: Vec<u8>) -> anyhow::Result<Hash> {
        let buf: [u8; 32] = val
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("Invalid Hash length {}", v.len()))?;
        Ok(Hash(buf))
    }
}

#[cfg(feature = "crypto")]
impl<'a> TryFrom<&'a str> for Hash {
    type Error = anyhow::Error;
    fn try_from(val: &str) -> anyhow::Result<Hash> {
        let mut buf = [0u8; 32];
        let len = bs58::decode(val).into(&mut buf)?;
        if len != 32 {
            return Err(anyhow::anyhow!("Invalid Hash length {}", len));
        }
        Ok(Hash(buf))
    }
}

#[cfg(all(feature = "crypto", feature = "sql"))]
impl sea_orm::TryFromU64 for Hash {
    fn try_from_u64(_n: u64) -> Result<Self, sea_orm::DbErr> {
        Err(sea_orm::DbErr::Exec(
            "Hash cannot be converted from u64".to_string(),
        ))
    }
}

#[cfg(all(feature = "crypto", feature = "sql"))]
impl sea_orm::TryGetable for Hash {
    fn try_get(
        res: &sea_orm::QueryResult,
        pre: &str,
        col: &str,
    ) -> Result<Self, sea_orm::TryGetError> {
        let opt: Option<String> = res.try_get(pre, col).map_err(sea_orm::TryGetError::DbErr)?;
        match opt {
            Some(val) => Ok(Hash::try_from(val.as_str())
                .map_err(|_| sea_orm::DbErr::Exec("Invalid Hash".to_string()))
                .map_err(sea_orm::TryGetError::DbErr)?),
            None => Err(sea_orm::TryGetError::Null),
        }
    }
}

#[cfg(all(feature = "crypto", feature = "sql"))]
impl sea_orm::sea_query::Nullable for Hash {
    fn null() -> sea_orm::Value {
        sea_orm::Value::String(None)
    }
}

#[cfg(all(feature = "crypto", feature = "sql"))]
impl sea_orm::sea_query::ValueType for Hash {
    fn try_from(v: sea_orm::Value) -> Result<Self, sea_orm::sea_query::ValueTypeErr> {
        match v {
            sea_orm::Value::String(Some(x)) => {
                Ok(<Hash as TryFrom<&str>>::try_from(x.as_str())
                    .map_err(|_| sea_orm::sea_query::ValueTypeErr)?)
            }
            _ => Err(sea_orm::sea_query::ValueTypeErr),
        }
    }

    fn type_name() -> String {
        "Hash".to_string()
    }

    fn column_type() -> sea_orm::sea_query::ColumnType {
        sea_orm::sea_query::ColumnType::Text
    }
}

#[cfg(all(feature = "crypto", feature = "sql"))]
impl From<Hash> for sea_orm::Value {
    fn from(h: Hash) -> sea_orm::Value {
        sea_orm::Value::from(h.to_string())
    }
}
