pub mod git;
pub mod isolator;

pub use git::RepoInfo;
pub use isolator::{branch_name, Workspace, WorkspaceIsolator};
