// REST surface of the ledger node
//
// Handlers map ledger rejections to 400 and storage failures to 500

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
