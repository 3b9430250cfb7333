pub mod cache;
pub mod matcher;
pub mod node;
pub mod options;
pub mod query;

pub use cache::{fingerprint, CacheKey, CacheStats, QueryCache};
pub use matcher::{property_matches, StructuralMatcher};
pub use node::{NodeId, NodeTree, TreeNode};
pub use options::{QueryOptions, ResultFilter, SortOrder};
pub use query::{EngineStats, MatchMetadata, MatchResult, QueryEngine};
