use super::*;
use bpv7::{Bundle, DtnTime, EndpointId};
use std::collections::HashSet;

/// Processing constraints a bundle in transit is subject to. A pack without
/// constraints is done and may be garbage collected by the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Waiting for a dispatch decision.
    DispatchPending,
    /// Queued for forwarding to another node.
    ForwardPending,
    /// Destined to an endpoint on this node.
    LocalEndpoint,
    /// Forwarding is currently impossible.
    Contraindicated,
}

/// A bundle in transit plus the metadata the processor tracks for it: the
/// receiver endpoint that accepted it, the reception time, and the current
/// constraint set.
#[derive(Debug, Clone)]
pub struct BundlePack {
    pub bundle: Bundle,
    pub receiver: EndpointId,
    pub received_at: DtnTime,
    constraints: HashSet<Constraint>,
}

impl BundlePack {
    /// A pack for a bundle received through the given local endpoint.
    pub fn new_received(bundle: Bundle, receiver: EndpointId) -> Self {
        Self {
            bundle,
            receiver,
            received_at: DtnTime::now(),
            constraints: HashSet::new(),
        }
    }

    /// A pack for a locally originated bundle.
    pub fn new_local(bundle: Bundle) -> Self {
        let receiver = bundle.primary_block.source.clone();
        Self::new_received(bundle, receiver)
    }

    pub fn id(&self) -> String {
        self.bundle.id().to_string()
    }

    pub fn has_constraint(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }

    pub fn has_constraints(&self) -> bool {
        !self.constraints.is_empty()
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.insert(constraint);
    }

    pub fn remove_constraint(&mut self, constraint: Constraint) {
        self.constraints.remove(&constraint);
    }

    /// Removes every constraint, marking this pack as settled.
    pub fn purge_constraints(&mut self) {
        self.constraints.clear();
    }
}

impl std::fmt::Display for BundlePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpv7::builder::Builder;

    #[test]
    fn test_constraints() {
        let bundle = Builder::new()
            .source("dtn://src/")
            .destination("dtn://dest/")
            .lifetime("60s")
            .payload_block(b"x".to_vec())
            .build()
            .unwrap();
        let mut pack = BundlePack::new_local(bundle);

        assert!(!pack.has_constraints());
        pack.add_constraint(Constraint::DispatchPending);
        pack.add_constraint(Constraint::ForwardPending);
        assert!(pack.has_constraint(Constraint::DispatchPending));

        pack.remove_constraint(Constraint::DispatchPending);
        assert!(!pack.has_constraint(Constraint::DispatchPending));
        assert!(pack.has_constraints());

        pack.purge_constraints();
        assert!(!pack.has_constraints());
    }
}
