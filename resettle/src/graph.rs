use crate::service::Service;
use std::collections::HashMap;
use std::rc::Rc;

/// A dependency graph expressed as an ordered list of levels.
///
/// Level 0 holds the direct dependencies of the target service; level N + 1
/// holds the union of level N's direct dependencies. A service may appear at
/// multiple levels: the deepest-first install order together with the install
/// list makes the duplicate a no-op.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    levels: Vec<Level>,
}

impl DepGraph {
    pub fn new() -> DepGraph {
        DepGraph { levels: Vec::new() }
    }

    /// Adds a service to the given level, creating the level when it is the
    /// first one past the current depth. Inserting any deeper is a bug in the
    /// resolver.
    pub fn insert(&mut self, level: usize, srv: Rc<Service>) {
        if level > self.depth() {
            panic!(
                "inserting a dependency at level {} but the graph depth is {}",
                level,
                self.depth()
            );
        }
        if level == self.depth() {
            self.levels.push(Level::default());
        }
        self.levels[level].insert(srv);
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> &Level {
        &self.levels[index]
    }
}

impl PartialEq for DepGraph {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels
    }
}

/// A single level of the graph: a set of services deduplicated by name.
/// Iteration order is not guaranteed.
#[derive(Debug, Clone, Default)]
pub struct Level {
    services: HashMap<String, Rc<Service>>,
}

impl Level {
    fn insert(&mut self, srv: Rc<Service>) {
        self.services.insert(srv.name.clone(), srv);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Rc<Service>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.services.len() == other.services.len()
            && self.services.keys().all(|name| other.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> Rc<Service> {
        Rc::new(Service {
            name: name.to_owned(),
            ..Service::default()
        })
    }

    #[test]
    pub fn new_graph_is_empty() {
        let graph = DepGraph::new();
        assert_eq!(graph.depth(), 0);
    }

    #[test]
    pub fn insert_one_level() {
        let mut graph = DepGraph::new();
        graph.insert(0, service("serv1"));
        assert_eq!(graph.depth(), 1);
        assert!(graph.level(0).contains("serv1"));
    }

    #[test]
    pub fn insert_two_levels() {
        let mut graph = DepGraph::new();
        graph.insert(0, service("serv1"));
        graph.insert(1, service("serv2"));
        assert_eq!(graph.depth(), 2);
        assert!(graph.level(0).contains("serv1"));
        assert!(graph.level(1).contains("serv2"));
    }

    #[test]
    pub fn insert_deduplicates_by_name() {
        let mut graph = DepGraph::new();
        graph.insert(0, service("serv1"));
        graph.insert(0, service("serv1"));
        assert_eq!(graph.level(0).len(), 1);
    }

    #[test]
    #[should_panic]
    pub fn insert_past_depth_panics() {
        let mut graph = DepGraph::new();
        graph.insert(1, service("serv1"));
    }

    #[test]
    pub fn equality_is_by_name_per_level() {
        let mut a = DepGraph::new();
        a.insert(0, service("x"));
        a.insert(0, service("y"));
        a.insert(1, service("z"));

        let mut b = DepGraph::new();
        b.insert(0, service("y"));
        b.insert(0, service("x"));
        b.insert(1, service("z"));

        let mut c = DepGraph::new();
        c.insert(0, service("x"));
        c.insert(0, service("z"));
        c.insert(1, service("y"));

        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_ne!(a, c);
    }

    #[test]
    pub fn levels_must_match_pairwise() {
        let mut a = DepGraph::new();
        a.insert(0, service("x"));

        let mut b = DepGraph::new();
        b.insert(0, service("x"));
        b.insert(1, service("y"));

        assert_ne!(a, b);
    }
}
