mod ino;
mod inode;
mod ops;
mod statx;

pub use ino::Ino;
pub use inode::{
    Inode, InodeDir, InodeDirOps, InodeFile, InodeFileOps, InodeInfo, InodeOps, InodeRef, InodeUse,
};
pub use ops::{RenameData, WriteOffset};
