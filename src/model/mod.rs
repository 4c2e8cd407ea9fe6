use thiserror::Error;

pub mod identity;
pub mod project;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Could not derive a repository name from url `{0}`")]
    InvalidUrl(String),
}

/// Branches and commits are written as `""` when unspecified, and both `""` and
/// `null` read back as `None`.
pub(crate) mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|v| !v.is_empty()))
    }
}
