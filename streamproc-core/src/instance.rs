use std::sync::Arc;

/// Identifies one processor instance: a topology node name plus the
/// partition it owns. The worker pool is shared across all instances on
/// a driver; this is how a task is attributed back to its instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessorId {
    /// Name of the topology node.
    pub name: Arc<str>,
    /// Partition this instance owns.
    pub partition: i32,
}

impl ProcessorId {
    /// Builds a new processor instance identifier.
    pub fn new(name: impl Into<Arc<str>>, partition: i32) -> Self {
        Self {
            name: name.into(),
            partition,
        }
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.name, self.partition)
    }
}
