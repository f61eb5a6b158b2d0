use actix_web::web;

use super::handlers;

/// Mounts every ledger endpoint under `/api/v1`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/transactions/{hash}", web::get().to(handlers::get_transaction))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/mining/reward", web::get().to(handlers::get_mining_reward))
            .route("/difficulty", web::get().to(handlers::get_difficulty))
            .route("/difficulty", web::post().to(handlers::set_difficulty))
            .route("/wallet/new", web::post().to(handlers::create_wallet))
            .route("/wallet/balance/{address}", web::get().to(handlers::get_wallet_balance))
            .route("/wallet/history/{address}", web::get().to(handlers::get_wallet_history))
            .route("/accounts", web::get().to(handlers::get_all_accounts)),
    );
}
