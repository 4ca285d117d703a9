/// Name and version of a database, as listed by `Environment::databases`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Summary of a live object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStat {
    /// Number of records
    pub entries: usize,
    /// Number of indexes
    pub indexes: usize,
    /// Next number the key generator would hand out, if the store has one
    pub next_generated_key: Option<u64>,
}

/// Live entity counts of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvStat {
    pub databases: usize,
    pub connections: usize,
    pub transactions: usize,
    pub requests: usize,
    pub cursors: usize,
    /// Registered event handlers
    pub handlers: usize,
}

/// Sort names by UTF-16 code units and drop duplicates
pub(crate) fn sorted_name_list(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
    names.dedup();
    names
}
