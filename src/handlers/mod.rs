pub mod catalog;
pub mod health;
pub mod reports;
pub mod stock;

use crate::services::stock_accessor::StockScope;
use axum::{
    routing::{get, post, put},
    Router,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Narrowest ledger scope for the optional medicine/location filters that
/// list endpoints accept.
pub fn scope_for(medicine_id: Option<i64>, location_id: Option<i64>) -> StockScope {
    match (medicine_id, location_id) {
        (Some(medicine_id), Some(location_id)) => StockScope::Shelf {
            medicine_id,
            location_id,
        },
        (Some(medicine_id), None) => StockScope::Medicine(medicine_id),
        (None, Some(location_id)) => StockScope::Location(location_id),
        (None, None) => StockScope::All,
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        // Catalog
        .route(
            "/medicines",
            get(catalog::list_medicines).post(catalog::create_medicine),
        )
        .route(
            "/medicines/:id",
            get(catalog::get_medicine)
                .put(catalog::update_medicine)
                .delete(catalog::delete_medicine),
        )
        .route(
            "/locations",
            get(catalog::list_locations).post(catalog::create_location),
        )
        .route(
            "/locations/:id",
            get(catalog::get_location)
                .put(catalog::update_location)
                .delete(catalog::delete_location),
        )
        .route(
            "/providers",
            get(catalog::list_providers).post(catalog::create_provider),
        )
        .route(
            "/providers/:id",
            get(catalog::get_provider).delete(catalog::delete_provider),
        )
        // Ledger
        .route("/medicines/:id/stock", get(stock::medicine_stock))
        .route("/medicines/:id/reorder-check", post(stock::reorder_check))
        .route("/locations/:id/stock", get(stock::location_stock))
        .route("/stock/receive", post(stock::receive_stock))
        .route("/stock/reduce", post(stock::reduce_stock))
        .route("/batches", get(stock::list_batches))
        .route(
            "/batches/:id",
            put(stock::adjust_batch).delete(stock::delete_batch),
        )
        // Reports
        .route("/reports/expired", get(reports::expired))
        .route("/reports/expiring-soon", get(reports::expiring_soon))
        .route("/reports/below-threshold", get(reports::below_threshold))
        .route("/reports/expiry-sweep", post(reports::expiry_sweep))
}
