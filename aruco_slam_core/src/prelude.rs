// aruco_slam_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::estimation::{build_filter, build_filter_with_map, FrameReport, SlamFilter};

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::config::{FilterVariant, LandmarkInit, SlamConfig};
pub use crate::error::SlamError;
pub use crate::map::{LandmarkEntry, LandmarkMap};
pub use crate::state::FilterState;
pub use crate::types::{Detection, MarkerId};

// --- Concrete Filter Implementations (Export for direct construction) ---
pub use crate::estimation::filters::{AdditiveEkf, MultiplicativeEkf};
