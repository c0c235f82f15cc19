//! Configuration.
//!
//! Tiers, lowest to highest priority, merged field by field:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/project-tree/config.yaml`
//! 3. **User** - `~/.project-tree/config.yaml`
//! 4. **Environment**
//!
//! ## Environment Variables
//! - `PROJECT_TREE_CONFIG_PATH` - Explicit config file (replaces tiers 1-3)
//! - `PROJECT_TREE_DB_PATH` - Database path
//! - `PROJECT_TREE_LOCK_TIMEOUT_MS` - Lock wait bound in milliseconds
//! - `PROJECT_TREE_USER_DIR` - User config dir (default: `~/.project-tree`)
//! - `PROJECT_TREE_PROJECT_DIR` - Project config dir (default: `./project-tree`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{merge_into, merge_layers};
pub use types::*;
