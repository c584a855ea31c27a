use std::path::Path;

use figment::{
    providers::{Format as _, Yaml},
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A YAML file parsed once, at load time.
///
/// Edits made to the file afterwards are not observed.
pub struct YamlSnapshot {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl YamlSnapshot {
    /// Reads and parses the file at `path`.
    pub fn read<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;

        Ok(Self {
            data: Yaml::string(&contents).data()?,
            metadata: Metadata::from("YAML file", path),
        })
    }
}

impl Provider for YamlSnapshot {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
