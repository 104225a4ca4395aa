use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use data_model::{BlobServer, DataModelError, DEFAULT_GROUP};
use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidServer(DataModelError),
    DuplicateLocation { location: String, group: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidServer(e) => write!(f, "{}", e),
            RegistryError::DuplicateLocation { location, group } => write!(
                f,
                "blob-server {} is already registered in group {}",
                location, group
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<DataModelError> for RegistryError {
    fn from(e: DataModelError) -> Self {
        RegistryError::InvalidServer(e)
    }
}

/// The known blob-servers, partitioned into groups.
///
/// Built once during startup and shared read-only afterwards, so every
/// handler observes the same membership for the life of the process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerRegistry {
    servers: Vec<BlobServer>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&mut self, group: &str, location: &str) -> Result<(), RegistryError> {
        let server = BlobServer::new(group, location)?;
        if let Some(existing) = self.servers.iter().find(|s| s.base() == server.base()) {
            return Err(RegistryError::DuplicateLocation {
                location: server.base().to_string(),
                group: existing.group.clone(),
            });
        }
        self.servers.push(server);
        Ok(())
    }

    /// Registers every `(group, locations)` entry. Bad entries are skipped and
    /// returned so the caller can report them; the good ones stay registered.
    pub fn init_servers(&mut self, servers: &BTreeMap<String, Vec<String>>) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        for (group, locations) in servers {
            for location in locations {
                if let Err(e) = self.add_server(group, location) {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Builds the registry a process runs with: configured groups first, then
    /// the command-line list. Bad entries are logged and left out.
    pub fn from_sources(
        configured: &BTreeMap<String, Vec<String>>,
        command_line: Option<&str>,
    ) -> Self {
        let mut registry = Self::new();
        let mut errors = registry.init_servers(configured);
        if let Some(list) = command_line {
            errors.extend(registry.add_command_line_servers(list));
        }
        for e in &errors {
            warn!(error = %e, "ignoring blob-server entry");
        }
        if registry.is_empty() {
            warn!("no blob-servers registered");
        } else {
            info!(
                servers = registry.servers.len(),
                groups = registry.groups().len(),
                "blob-server registry loaded"
            );
        }
        registry
    }

    /// Adds a comma-separated list of locations to the `default` group.
    pub fn add_command_line_servers(&mut self, list: &str) -> Vec<RegistryError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| self.add_server(DEFAULT_GROUP, entry).err())
            .collect()
    }

    pub fn servers(&self) -> &[BlobServer] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn groups(&self) -> BTreeSet<String> {
        self.servers.iter().map(|s| s.group.clone()).collect()
    }

    pub fn group_members(&self, group: &str) -> Vec<BlobServer> {
        self.servers
            .iter()
            .filter(|s| s.group == group)
            .cloned()
            .collect()
    }

    /// Every server exactly once, one representative of each group first.
    pub fn ordered_servers(&self) -> Vec<BlobServer> {
        self.ordered_servers_with(&mut rand::rng())
    }

    /// Groups are visited in random order and a random member of each is
    /// emitted; the remaining members of all groups follow, shuffled.
    pub fn ordered_servers_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<BlobServer> {
        let mut by_group: BTreeMap<&str, Vec<&BlobServer>> = BTreeMap::new();
        for server in &self.servers {
            by_group.entry(server.group.as_str()).or_default().push(server);
        }

        let mut groups: Vec<Vec<&BlobServer>> = by_group.into_values().collect();
        groups.shuffle(rng);

        let mut representatives = Vec::with_capacity(groups.len());
        let mut rest = Vec::with_capacity(self.servers.len());
        for mut members in groups {
            members.shuffle(rng);
            let mut members = members.into_iter();
            if let Some(first) = members.next() {
                representatives.push(first.clone());
            }
            rest.extend(members.cloned());
        }
        rest.shuffle(rng);

        representatives.extend(rest);
        representatives
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn registry(entries: &[(&str, &str)]) -> ServerRegistry {
        let mut registry = ServerRegistry::new();
        for (group, location) in entries {
            registry.add_server(group, location).unwrap();
        }
        registry
    }

    fn assert_permutation(registry: &ServerRegistry, ordered: &[BlobServer]) {
        assert_eq!(ordered.len(), registry.servers().len());
        let unique: HashSet<&BlobServer> = ordered.iter().collect();
        assert_eq!(unique.len(), ordered.len());
        for server in registry.servers() {
            assert!(unique.contains(server));
        }
    }

    #[test]
    fn test_add_server_validation() {
        let mut registry = ServerRegistry::new();
        assert!(registry.add_server("", "http://localhost:3001").is_err());
        assert!(registry.add_server("default", "localhost").is_err());
        assert!(registry.add_server("default", "").is_err());
        registry.add_server("default", "http://localhost:3001").unwrap();
        assert_eq!(
            registry.add_server("other", "http://localhost:3001/"),
            Err(RegistryError::DuplicateLocation {
                location: "http://localhost:3001".to_string(),
                group: "default".to_string(),
            })
        );
        assert_eq!(registry.servers().len(), 1);

        registry.add_server("default", "http://h:1/sos").unwrap();
        assert_eq!(
            registry.add_server("default", "http://h:1/sos/"),
            Err(RegistryError::DuplicateLocation {
                location: "http://h:1/sos".to_string(),
                group: "default".to_string(),
            })
        );
        assert_eq!(registry.servers().len(), 2);
    }

    #[test]
    fn test_groups_and_members() {
        let registry = registry(&[
            ("east", "http://a:3001"),
            ("west", "http://b:3001"),
            ("east", "http://c:3001"),
        ]);
        assert_eq!(
            registry.groups().into_iter().collect::<Vec<_>>(),
            vec!["east".to_string(), "west".to_string()]
        );
        let east: Vec<String> = registry
            .group_members("east")
            .iter()
            .map(|s| s.base().to_string())
            .collect();
        assert_eq!(east, vec!["http://a:3001", "http://c:3001"]);
        assert!(registry.group_members("missing").is_empty());
    }

    #[test]
    fn test_init_servers_keeps_good_entries() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "default".to_string(),
            vec!["http://a:3001".to_string(), "bogus".to_string()],
        );
        servers.insert("".to_string(), vec!["http://b:3001".to_string()]);

        let mut registry = ServerRegistry::new();
        let errors = registry.init_servers(&servers);
        assert_eq!(errors.len(), 2);
        assert_eq!(registry.servers().len(), 1);
    }

    #[test]
    fn test_command_line_servers_use_default_group() {
        let mut registry = ServerRegistry::new();
        let errors = registry.add_command_line_servers("http://a:3001, http://b:3001,,");
        assert!(errors.is_empty());
        assert_eq!(registry.groups().len(), 1);
        assert_eq!(registry.group_members(DEFAULT_GROUP).len(), 2);
    }

    #[test]
    fn test_from_sources_merges_config_and_command_line() {
        let mut servers = BTreeMap::new();
        servers.insert("east".to_string(), vec!["http://a:3001".to_string()]);

        let registry =
            ServerRegistry::from_sources(&servers, Some("http://b:3001,http://a:3001,nope"));
        assert_eq!(registry.servers().len(), 2);
        assert_eq!(registry.group_members("east").len(), 1);
        assert_eq!(registry.group_members(DEFAULT_GROUP).len(), 1);

        let empty = ServerRegistry::from_sources(&BTreeMap::new(), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_ordered_servers_empty_registry() {
        let registry = ServerRegistry::new();
        assert!(registry.ordered_servers().is_empty());
        assert!(registry.groups().is_empty());
    }

    #[test]
    fn test_ordered_servers_single_group() {
        let registry = registry(&[
            ("default", "http://a:3001"),
            ("default", "http://b:3001"),
            ("default", "http://c:3001"),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_permutation(&registry, &registry.ordered_servers_with(&mut rng));
        }
    }

    #[test]
    fn test_ordered_servers_representatives_first() {
        let registry = registry(&[
            ("one", "http://a:3001"),
            ("one", "http://b:3001"),
            ("one", "http://c:3001"),
            ("two", "http://d:3001"),
            ("three", "http://e:3001"),
            ("three", "http://f:3001"),
        ]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut first_positions = HashSet::new();
        for _ in 0..200 {
            let ordered = registry.ordered_servers_with(&mut rng);
            assert_permutation(&registry, &ordered);

            let leading: HashSet<&str> = ordered[..3].iter().map(|s| s.group.as_str()).collect();
            assert_eq!(leading.len(), 3, "one member per group must lead: {:?}", ordered);
            first_positions.insert(ordered[0].base().to_string());
        }
        // Every server eventually leads the order.
        assert_eq!(first_positions.len(), 6);
    }

    #[test]
    fn test_ordered_servers_uses_thread_rng() {
        let registry = registry(&[("a", "http://a:3001"), ("b", "http://b:3001")]);
        assert_permutation(&registry, &registry.ordered_servers());
    }
}
