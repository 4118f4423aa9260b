//! Pure route and map engines: build a route from the clinic template, merge
//! backend patches into it, and project navigation commands onto the map.

pub mod error;
pub mod highlight;
pub mod route;

pub use error::NavigationError;
pub use highlight::{compute_highlights, extract_path, parse_map_graph, HighlightSummary};
pub use route::{
    apply_patches, base_route_template, format_patches_for_display, format_route_for_display,
    generate_original_route, validate_route_continuity, PatchAnomaly, PatchOutcome,
    RouteValidation, CLINIC_PLACEHOLDER,
};
