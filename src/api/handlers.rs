use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Account, Address, Block, Blockchain, BlockchainError, ChainViolation, HistoryEntry,
    Transaction, TransactionRecord, Wallet,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Maps ledger failures to HTTP: caller mistakes are 400, anything else 500
fn error_response(err: &BlockchainError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    if err.is_rejection() {
        HttpResponse::BadRequest().json(body)
    } else {
        error!("Ledger failure: {}", err);
        HttpResponse::InternalServerError().json(body)
    }
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message.into() }))
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();
    let is_valid = blockchain.is_chain_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,

    /// First broken block, when the chain is invalid
    pub violation: Option<ChainViolation>,
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    let violation = blockchain.validate_chain().err();

    HttpResponse::Ok().json(ValidationResponse {
        valid: violation.is_none(),
        violation,
    })
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_pending_transactions())
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key, hex encoded (for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,

    /// The signed transaction
    pub transaction: Transaction,
}

/// Create a new transaction
///
/// Signs a transfer with the given key and adds it to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data or insufficient balance"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    if !request.amount.is_finite() || request.amount <= 0.0 {
        return bad_request("Amount must be positive");
    }

    if request.recipient.trim().is_empty() {
        return bad_request("Recipient address is required");
    }

    let wallet = match Wallet::from_secret_hex(&request.private_key) {
        Ok(wallet) => wallet,
        Err(err) => return bad_request(format!("Invalid private key: {}", err)),
    };

    if wallet.address().0 != request.sender {
        return bad_request("Private key does not match sender address");
    }

    let mut transaction = Transaction::new(
        wallet.address().clone(),
        Address(request.recipient),
        request.amount,
        None,
    );

    if let Err(err) = transaction.sign(&wallet) {
        return bad_request(format!("Failed to sign transaction: {}", err));
    }

    // Admission waits for any running mining job, keep it off the async workers
    let ledger = blockchain.clone();
    let submitted = transaction.clone();
    match web::block(move || ledger.add_transaction(submitted)).await {
        Ok(Ok(block_index)) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction added to pending pool".to_string(),
            block_index,
            transaction,
        }),
        Ok(Err(err)) => error_response(&err),
        Err(err) => error_response(&BlockchainError::SystemError(err.to_string())),
    }
}

/// Get a mined transaction
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{hash}",
    params(("hash" = String, Path, description = "Transaction hash")),
    responses(
        (status = 200, description = "Transaction found", body = TransactionRecord),
        (status = 404, description = "No mined transaction with this hash")
    )
)]
pub async fn get_transaction(blockchain: BlockchainData, hash: web::Path<String>) -> impl Responder {
    match blockchain.get_transaction(&hash) {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Transaction {} not found", hash)
        })),
        Err(err) => error_response(&err),
    }
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request"),
        (status = 500, description = "Block could not be persisted, retry")
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let miner_address = mine_req.into_inner().miner_address;
    if miner_address.trim().is_empty() {
        return bad_request("Miner address required");
    }

    let ledger = blockchain.clone();
    match web::block(move || ledger.mine_pending_transactions(&Address(miner_address))).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "Block mined successfully".to_string(),
            block,
        }),
        Ok(Err(err)) => error_response(&err),
        Err(err) => error_response(&BlockchainError::SystemError(err.to_string())),
    }
}

/// Get the mining reward
#[utoipa::path(
    get,
    path = "/api/v1/mining/reward",
    responses(
        (status = 200, description = "Reward credited per mined block")
    )
)]
pub async fn get_mining_reward(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "mining_reward": blockchain.mining_reward() }))
}

/// Difficulty payload
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DifficultyRequest {
    /// Leading zero hex digits required (1-10)
    pub difficulty: u8,
}

/// Get the mining difficulty
#[utoipa::path(
    get,
    path = "/api/v1/difficulty",
    responses(
        (status = 200, description = "Current difficulty", body = DifficultyRequest)
    )
)]
pub async fn get_difficulty(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(DifficultyRequest {
        difficulty: blockchain.get_difficulty(),
    })
}

/// Set the mining difficulty
#[utoipa::path(
    post,
    path = "/api/v1/difficulty",
    request_body = DifficultyRequest,
    responses(
        (status = 200, description = "Difficulty updated", body = DifficultyRequest),
        (status = 400, description = "Difficulty out of range")
    )
)]
pub async fn set_difficulty(
    blockchain: BlockchainData,
    difficulty_req: web::Json<DifficultyRequest>,
) -> impl Responder {
    let difficulty = difficulty_req.difficulty;

    let ledger = blockchain.clone();
    match web::block(move || ledger.set_difficulty(difficulty)).await {
        Ok(Ok(())) => HttpResponse::Ok().json(DifficultyRequest {
            difficulty: blockchain.get_difficulty(),
        }),
        Ok(Err(err)) => error_response(&err),
        Err(err) => error_response(&BlockchainError::SystemError(err.to_string())),
    }
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's public key (base58)
    pub public_key: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key is not kept by the node
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        public_key: wallet.encoded_public_key(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Confirmed balance; pending transactions are not counted
    pub balance: f64,
}

/// Get wallet balance
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(("address" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> impl Responder {
    let address = Address(address.into_inner());

    match blockchain.get_balance(&address) {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            address: address.0,
            balance,
        }),
        Err(err) => error_response(&err),
    }
}

/// Response for the history endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub address: String,
    pub transactions: Vec<HistoryEntry>,
}

/// Get wallet transaction history
#[utoipa::path(
    get,
    path = "/api/v1/wallet/history/{address}",
    params(("address" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "Mined transactions involving the address", body = HistoryResponse)
    )
)]
pub async fn get_wallet_history(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> impl Responder {
    let address = Address(address.into_inner());
    let transactions = blockchain.get_transaction_history(&address);

    HttpResponse::Ok().json(HistoryResponse {
        address: address.0,
        transactions,
    })
}

/// Get all accounts
///
/// Returns every row of the balance table
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "Accounts retrieved successfully", body = Vec<Account>)
    )
)]
pub async fn get_all_accounts(blockchain: BlockchainData) -> impl Responder {
    match blockchain.accounts() {
        Ok(accounts) => HttpResponse::Ok().json(accounts),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::LedgerConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn ledger() -> BlockchainData {
        web::Data::new(
            Blockchain::in_memory(LedgerConfig {
                difficulty: 1,
                mining_reward: 50.0,
            })
            .unwrap(),
        )
    }

    #[actix_web::test]
    async fn test_mine_then_transfer() {
        let blockchain = ledger();
        let app = test::init_service(
            App::new().app_data(blockchain.clone()).configure(configure_routes),
        )
        .await;
        let alice = Wallet::new();
        let bob = Wallet::new();

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest { miner_address: alice.address().0.clone() })
            .to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block.index, 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: alice.address().0.clone(),
                recipient: bob.address().0.clone(),
                amount: 10.0,
                private_key: hex::encode(alice.export_secret_key()),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest { miner_address: alice.address().0.clone() })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/balance/{}", alice.address()))
            .to_request();
        let resp: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.balance, 90.0);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/history/{}", bob.address()))
            .to_request();
        let resp: HistoryResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.transactions.len(), 1);

        let hash = resp.transactions[0].transaction.hash();
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/transactions/{}", hash))
            .to_request();
        let resp: TransactionRecord = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block_index, 2);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let resp: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.valid);
        assert!(resp.violation.is_none());
    }

    #[actix_web::test]
    async fn test_transaction_input_errors_are_client_errors() {
        let blockchain = ledger();
        let app = test::init_service(
            App::new().app_data(blockchain.clone()).configure(configure_routes),
        )
        .await;
        let alice = Wallet::new();
        let mallory = Wallet::new();

        let request = |amount: f64, sender: &Wallet, key: &Wallet| TransactionRequest {
            sender: sender.address().0.clone(),
            recipient: "bob".to_string(),
            amount,
            private_key: hex::encode(key.export_secret_key()),
        };

        // non-positive amount is refused at this boundary
        for body in [request(0.0, &alice, &alice), request(-1.0, &alice, &alice)] {
            let req = test::TestRequest::post().uri("/api/v1/transactions/new").set_json(body).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }

        // key of someone else
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(request(1.0, &alice, &mallory))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        // no funds
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(request(1.0, &alice, &alice))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        // missing fields
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({ "sender": "x" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_difficulty_bounds() {
        let blockchain = ledger();
        let app = test::init_service(
            App::new().app_data(blockchain.clone()).configure(configure_routes),
        )
        .await;

        for bad in [0u8, 11] {
            let req = test::TestRequest::post()
                .uri("/api/v1/difficulty")
                .set_json(DifficultyRequest { difficulty: bad })
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(blockchain.get_difficulty(), 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/difficulty")
            .set_json(DifficultyRequest { difficulty: 3 })
            .to_request();
        let resp: DifficultyRequest = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.difficulty, 3);

        let req = test::TestRequest::get().uri("/api/v1/difficulty").to_request();
        let resp: DifficultyRequest = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.difficulty, 3);
    }

    #[actix_web::test]
    async fn test_unknown_transaction_is_not_found() {
        let app = test::init_service(App::new().app_data(ledger()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/transactions/deadbeef").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
