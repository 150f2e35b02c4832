// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    DataDir, build_create_request, build_update, format_proxy_report, format_scan_table,
    initialize_data_dir, load_points_from_file, load_proxies_from_file, open_service,
    parse_point_line, render_details,
};
