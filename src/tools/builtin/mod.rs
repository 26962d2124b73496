pub mod command;
pub mod filesystem;
pub mod text;

pub use command::{AskHumanTool, RunCommandTool};
pub use filesystem::{FileDeleteTool, FileListTool, FileMoveTool, FileReadTool, FileWriteTool};
pub use text::{TextReplaceTool, TextSearchTool};
