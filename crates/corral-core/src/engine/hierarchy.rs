use std::collections::{HashMap, HashSet, VecDeque};

use crate::entity::{Direction, Group};

pub const MIN_LEVEL: usize = 1;
pub const MAX_LEVEL: usize = 5;

/// Maps a requested depth onto the supported range; zero means "as deep as allowed".
pub fn clamp_level(level: usize) -> usize {
    match level {
        0 => MAX_LEVEL,
        n => n.clamp(MIN_LEVEL, MAX_LEVEL),
    }
}

/// Parent-pointer forest of groups, walked in process.
pub struct Hierarchy {
    groups: HashMap<String, Group>,
    children: HashMap<String, Vec<String>>,
}

impl Hierarchy {
    pub fn new(groups: impl IntoIterator<Item = Group>) -> Self {
        let groups: HashMap<String, Group> =
            groups.into_iter().map(|g| (g.id.clone(), g)).collect();

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for group in groups.values() {
            if let Some(ref parent) = group.parent_id {
                children.entry(parent.clone()).or_default().push(group.id.clone());
            }
        }
        for ids in children.values_mut() {
            ids.sort();
        }

        Self { groups, children }
    }

    pub fn get(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.groups.contains_key(id)
    }

    /// Walks from `root` including the root itself at level 0.
    ///
    /// Returns `None` when the root is unknown.
    pub fn walk(&self, root: &str, direction: Direction, level: usize) -> Option<Vec<Group>> {
        if !self.contains(root) {
            return None;
        }
        let depth = clamp_level(level);

        Some(match direction {
            Direction::Ancestors => self.ancestors(root, depth),
            Direction::Descendants => self.descendants(root, depth),
        })
    }

    /// Every group, each with its full path from the top of its branch.
    pub fn all(&self) -> Vec<Group> {
        let mut ids: Vec<&String> = self.groups.keys().collect();
        ids.sort();

        ids.into_iter()
            .filter_map(|id| {
                let mut group = self.groups.get(id)?.clone();
                group.level = 0;
                group.path = self.path_of(id);
                Some(group)
            })
            .collect()
    }

    fn ancestors(&self, root: &str, depth: usize) -> Vec<Group> {
        let mut chain: Vec<&Group> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = self.groups.get(root);

        while let Some(group) = current {
            if chain.len() > depth || !visited.insert(group.id.as_str()) {
                break;
            }
            chain.push(group);
            current = group
                .parent_id
                .as_deref()
                .and_then(|parent| self.groups.get(parent));
        }

        (0..chain.len())
            .map(|i| {
                let mut group = chain[i].clone();
                group.level = i;
                group.path = chain[i..]
                    .iter()
                    .rev()
                    .map(|g| g.id.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                group
            })
            .collect()
    }

    fn descendants(&self, root: &str, depth: usize) -> Vec<Group> {
        let mut result = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize, String)> = VecDeque::new();
        queue.push_back((root, 0, root.to_string()));
        visited.insert(root);

        while let Some((id, level, path)) = queue.pop_front() {
            let Some(group) = self.groups.get(id) else {
                continue;
            };
            let mut projected = group.clone();
            projected.level = level;
            projected.path = path.clone();
            result.push(projected);

            if level == depth {
                continue;
            }
            for child in self.children.get(id).into_iter().flatten() {
                if visited.insert(child.as_str()) {
                    queue.push_back((child.as_str(), level + 1, format!("{path}.{child}")));
                }
            }
        }

        result
    }

    fn path_of(&self, id: &str) -> String {
        let mut chain: Vec<&str> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = self.groups.get(id);

        while let Some(group) = current {
            if !visited.insert(group.id.as_str()) {
                break;
            }
            chain.push(group.id.as_str());
            current = group
                .parent_id
                .as_deref()
                .and_then(|parent| self.groups.get(parent));
        }

        chain.reverse();
        chain.join(".")
    }
}
