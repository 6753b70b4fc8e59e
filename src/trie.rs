//! Path trie
//!
//! Maps slash-separated paths to values. The linker uses it as its path
//! index and the mapper keeps per-path visit flags in one.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct TrieNode<T> {
    data: Option<T>,
    children: BTreeMap<String, TrieNode<T>>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            data: None,
            children: BTreeMap::new(),
        }
    }
}

/// A trie keyed by path components
#[derive(Debug, Clone)]
pub struct Trie<T> {
    root: TrieNode<T>,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

impl<T> Trie<T> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }

    /// Store `data` at `path`, returning the previous value
    pub fn insert(&mut self, path: &str, data: T) -> Option<T> {
        let mut curr = &mut self.root;
        for elem in components(path) {
            curr = curr.children.entry(elem.to_string()).or_default();
        }

        curr.data.replace(data)
    }

    pub fn get(&self, path: &str) -> Option<&T> {
        self.node(path).and_then(|nd| nd.data.as_ref())
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut T> {
        let mut curr = &mut self.root;
        for elem in components(path) {
            curr = curr.children.get_mut(elem)?;
        }

        curr.data.as_mut()
    }

    /// Remove `path` together with everything below it
    pub fn remove(&mut self, path: &str) -> Option<T> {
        let elems: Vec<&str> = components(path).collect();
        let Some((last, parents)) = elems.split_last() else {
            let old = self.root.data.take();
            self.root.children.clear();
            return old;
        };

        let mut curr = &mut self.root;
        for elem in parents {
            curr = curr.children.get_mut(*elem)?;
        }

        curr.children.remove(*last).and_then(|nd| nd.data)
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
    }

    pub fn is_empty(&self) -> bool {
        self.root.data.is_none() && self.root.children.is_empty()
    }

    /// Values stored on the way from the root down to `path`, inclusive
    pub fn ancestors(&self, path: &str) -> Vec<&T> {
        let mut found = Vec::new();
        let mut curr = &self.root;
        if let Some(data) = &curr.data {
            found.push(data);
        }

        for elem in components(path) {
            match curr.children.get(elem) {
                Some(child) => curr = child,
                None => break,
            }

            if let Some(data) = &curr.data {
                found.push(data);
            }
        }

        found
    }

    /// All stored values below `path` (inclusive) with their paths, sorted
    pub fn subtree(&self, path: &str) -> Vec<(String, &T)> {
        let mut out = Vec::new();
        let Some(start) = self.node(path) else {
            return out;
        };

        let mut prefix = String::new();
        for elem in components(path) {
            prefix.push('/');
            prefix.push_str(elem);
        }

        collect(start, &mut prefix, &mut out);
        out
    }

    fn node(&self, path: &str) -> Option<&TrieNode<T>> {
        let mut curr = &self.root;
        for elem in components(path) {
            curr = curr.children.get(elem)?;
        }

        Some(curr)
    }
}

fn collect<'a, T>(nd: &'a TrieNode<T>, prefix: &mut String, out: &mut Vec<(String, &'a T)>) {
    if let Some(data) = &nd.data {
        let path = if prefix.is_empty() { "/".to_string() } else { prefix.clone() };
        out.push((path, data));
    }

    for (name, child) in &nd.children {
        let len = prefix.len();
        prefix.push('/');
        prefix.push_str(name);
        collect(child, prefix, out);
        prefix.truncate(len);
    }
}
