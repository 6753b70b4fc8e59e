//! Hash computation for nodes using BLAKE3

use crate::types::Hash;
use blake3::Hasher;
use std::collections::BTreeMap;

/// Width every hash is padded to when mixed into a commit hash
const COMMIT_HASH_PAD: usize = 64;

fn update_len_prefixed(hasher: &mut Hasher, data: &[u8]) {
    hasher.update(&(data.len() as u64).to_be_bytes());
    hasher.update(data);
}

/// Tree hash of a file
///
/// TreeHash = hash("file" || path_len || path || content_hash)
///
/// Equal content at different paths yields different tree hashes, so both
/// versions can live side by side in the object store.
pub fn file_tree_hash(path: &str, content: &Hash) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"file");
    update_len_prefixed(&mut hasher, path.as_bytes());
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

/// Tree hash of a directory
///
/// TreeHash = hash("directory" || path_len || path || count || (name ':' child_hash)*)
///
/// `children` is a BTreeMap so entries are visited sorted by name.
pub fn directory_tree_hash(path: &str, children: &BTreeMap<String, Hash>) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"directory");
    update_len_prefixed(&mut hasher, path.as_bytes());
    hasher.update(&(children.len() as u64).to_be_bytes());
    for (name, hash) in children {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
    }

    hasher.finalize().into()
}

/// Content hash of a directory, mixed from its non-ghost children
///
/// Names are part of the hash, the directory's own path is not: two
/// directories with the same entries compare equal wherever they live.
pub fn directory_content_hash(contents: &BTreeMap<String, Hash>) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"contents");
    for (name, hash) in contents {
        update_len_prefixed(&mut hasher, name.as_bytes());
        hasher.update(hash.as_bytes());
    }

    hasher.finalize().into()
}

/// Tree hash of a ghost standing at `ghost_path` for the node `old_tree`
pub fn ghost_tree_hash(ghost_path: &str, old_tree: &Hash) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"ghost");
    update_len_prefixed(&mut hasher, ghost_path.as_bytes());
    hasher.update(old_tree.as_bytes());
    hasher.finalize().into()
}

fn padded(hash: &Hash) -> [u8; COMMIT_HASH_PAD] {
    let mut buf = [0u8; COMMIT_HASH_PAD];
    buf[..32].copy_from_slice(hash.as_bytes());
    buf
}

/// Hash of a boxed commit
///
/// Hash = hash(pad(hash(author)) || pad(parent) || pad(root) || message)
pub fn commit_hash(parent: Option<&Hash>, root: &Hash, author: &str, message: &str) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"commit");
    hasher.update(&padded(&Hash::sum(author.as_bytes())));
    hasher.update(&padded(parent.unwrap_or(&Hash::EMPTY)));
    hasher.update(&padded(root));
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Content hash of raw bytes, for callers that have the data at hand
pub fn content_hash(data: &[u8]) -> Hash {
    Hash::sum(data)
}
