//! filesystem primitive layer

pub mod ops;
pub mod sniff;
pub mod walk;

pub use ops::{
    chmod, entry_type, exists, fsync_dir, hardlink, is_dir, is_link, is_readonly,
    mkdir_recursive, remove_empty_parents, remove_tree, rename, replace_with_symlink,
    set_readonly, symlink, unlink, write_atomic, EntryType,
};
pub use sniff::TypeRegistry;
pub use walk::{walk, WalkEntry};

pub use crate::checksum::checksum_file as checksum;
