use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use folio_core::domain::metrics::{PortfolioComparison, PortfolioMetrics};
use folio_core::domain::plan::RebalancePlan;
use folio_core::domain::portfolio::{is_valid_ticker, Holding, Portfolio, PortfolioSnapshot};
use folio_core::domain::profile::InvestorProfile;
use folio_core::engine::{self, EngineError, PlanMode};
use folio_core::llm::anthropic::AnthropicClient;
use folio_core::llm::template::template_explanation;
use folio_core::llm::{refine_sector_preferences, LlmClient};
use folio_core::sectors::{SectorCatalog, SectorResolver, OTHER_SECTOR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = folio_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match folio_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let llm: Option<Arc<AnthropicClient>> = match AnthropicClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "no LLM client; profile extraction disabled, explanations use templates");
            None
        }
    };

    let catalog = Arc::new(SectorCatalog::embedded()?);

    let state = AppState { pool, llm, catalog };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/profile/init", post(profile_init))
        .route("/profile/update", post(profile_update))
        .route("/profile/:user_id", get(get_profile))
        .route("/portfolio/analyze", post(analyze_portfolio))
        .route("/recommend", post(recommend))
        .route("/portfolio/snapshot", post(save_snapshot))
        .route("/portfolio/history/:user_id", get(portfolio_history))
        .route("/portfolio/compare", post(compare_portfolios))
        .route("/ticker/lookup", post(lookup_ticker))
        .route("/ticker/sectors", post(ticker_sectors))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    llm: Option<Arc<AnthropicClient>>,
    catalog: Arc<SectorCatalog>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, ApiError> {
        self.pool.as_ref().ok_or_else(ApiError::db_unavailable)
    }

    fn llm(&self) -> Result<&Arc<AnthropicClient>, ApiError> {
        self.llm.as_ref().ok_or_else(|| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "llm_unavailable",
                "profile extraction requires ANTHROPIC_API_KEY",
            )
        })
    }

    async fn load_profile(&self, user_id: &str) -> Result<InvestorProfile, ApiError> {
        folio_core::storage::profiles::get_profile(self.pool()?, user_id)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| {
                ApiError::new(StatusCode::NOT_FOUND, "profile_not_found", "profile not found")
                    .with_detail(format!(
                        "no profile for user {user_id}; initialize one via POST /profile/init"
                    ))
            })
    }

    async fn explanation(
        &self,
        profile: &InvestorProfile,
        metrics: &PortfolioMetrics,
        plan: &RebalancePlan,
    ) -> String {
        if let Some(llm) = &self.llm {
            match llm.explain_plan(profile, metrics, plan).await {
                Ok(text) => return text,
                Err(e) => {
                    tracing::warn!(error = %e, "explain_plan failed; using template explanation");
                }
            }
        }
        template_explanation(profile, metrics, plan)
    }
}

// ---------------------------------------------------------------------------
// Error envelope

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error_code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                error_code,
                detail: None,
            },
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = Some(detail.into());
        self
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", error)
    }

    fn db_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "database_unavailable",
            "database is not available",
        )
    }

    fn internal(err: anyhow::Error) -> Self {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        )
    }

    fn from_engine(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(msg) => Self::bad_request(msg),
            EngineError::Degenerate(msg) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "degenerate_portfolio",
                msg,
            ),
            EngineError::NotNormalized { .. } => Self::internal(err.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    let ok = (1..=100).contains(&user_id.len())
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "user_id must be 1-100 characters of [A-Za-z0-9_-]",
        ))
    }
}

/// Normalize raw request holdings. A degenerate result (no usable equity
/// against a nonzero equity target) is a 422, not silently accepted.
fn normalize_input(holdings: &[Holding], cash_weight: f64) -> Result<NormalizedInput, ApiError> {
    let normalized =
        engine::normalize_strict(holdings, cash_weight).map_err(ApiError::from_engine)?;
    Ok(NormalizedInput {
        portfolio: normalized.portfolio,
        dropped: normalized
            .dropped
            .into_iter()
            .map(|d| DroppedHolding {
                ticker: d.ticker,
                reason: d.reason,
            })
            .collect(),
    })
}

struct NormalizedInput {
    portfolio: Portfolio,
    dropped: Vec<DroppedHolding>,
}

#[derive(Debug, Serialize)]
struct DroppedHolding {
    ticker: String,
    reason: String,
}

// ---------------------------------------------------------------------------
// Profile routes

#[derive(Debug, Deserialize)]
struct ProfileInitRequest {
    user_id: String,
    onboarding_text: String,
}

async fn profile_init(
    State(state): State<AppState>,
    Json(req): Json<ProfileInitRequest>,
) -> Result<Json<InvestorProfile>, ApiError> {
    validate_user_id(&req.user_id)?;
    if req.onboarding_text.trim().is_empty() {
        return Err(ApiError::bad_request("onboarding_text must be non-empty"));
    }
    let pool = state.pool()?;
    let llm = state.llm()?;

    let sector_names = state.catalog.sector_names();
    let mut profile = llm
        .extract_profile(&req.user_id, &req.onboarding_text, &sector_names)
        .await
        .map_err(ApiError::internal)?;
    refine_sector_preferences(&mut profile, &req.onboarding_text, &state.catalog);

    folio_core::storage::profiles::upsert_profile(pool, &profile)
        .await
        .map_err(ApiError::internal)?;

    tracing::info!(user_id = %profile.user_id, "profile initialized");
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct ProfileUpdateRequest {
    user_id: String,
    update_text: String,
}

async fn profile_update(
    State(state): State<AppState>,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<InvestorProfile>, ApiError> {
    validate_user_id(&req.user_id)?;
    if req.update_text.trim().is_empty() {
        return Err(ApiError::bad_request("update_text must be non-empty"));
    }
    let llm = state.llm()?;

    let current = state.load_profile(&req.user_id).await?;
    let sector_names = state.catalog.sector_names();
    let mut updated = llm
        .update_profile(&current, &req.update_text, &sector_names)
        .await
        .map_err(ApiError::internal)?;
    refine_sector_preferences(&mut updated, &req.update_text, &state.catalog);

    folio_core::storage::profiles::upsert_profile(state.pool()?, &updated)
        .await
        .map_err(ApiError::internal)?;

    tracing::info!(user_id = %updated.user_id, "profile updated");
    Ok(Json(updated))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<InvestorProfile>, ApiError> {
    validate_user_id(&user_id)?;
    let profile = state.load_profile(&user_id).await?;
    Ok(Json(profile))
}

// ---------------------------------------------------------------------------
// Portfolio routes

#[derive(Debug, Deserialize)]
struct PortfolioRequest {
    user_id: String,
    #[serde(default)]
    holdings: Vec<Holding>,
    #[serde(default)]
    cash_weight: f64,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    metrics: PortfolioMetrics,
    dropped: Vec<DroppedHolding>,
}

async fn analyze_portfolio(
    State(state): State<AppState>,
    Json(req): Json<PortfolioRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    validate_user_id(&req.user_id)?;
    let profile = state.load_profile(&req.user_id).await?;

    let input = normalize_input(&req.holdings, req.cash_weight)?;
    let metrics = engine::analyze(&input.portfolio, Some(&profile), state.catalog.as_ref())
        .map_err(ApiError::from_engine)?;

    Ok(Json(AnalyzeResponse {
        metrics,
        dropped: input.dropped,
    }))
}

#[derive(Debug, Serialize)]
struct RecommendResponse {
    profile: InvestorProfile,
    metrics: PortfolioMetrics,
    plan: RebalancePlan,
    explanation: String,
    operation_type: &'static str,
}

async fn recommend(
    State(state): State<AppState>,
    Json(req): Json<PortfolioRequest>,
) -> Result<Json<RecommendResponse>, ApiError> {
    validate_user_id(&req.user_id)?;
    let profile = state.load_profile(&req.user_id).await?;

    let (mode, current) = if req.holdings.is_empty() {
        (PlanMode::Construct, Portfolio::all_cash())
    } else {
        let input = normalize_input(&req.holdings, req.cash_weight)?;
        (PlanMode::Rebalance, input.portfolio)
    };

    let outcome = engine::plan_detailed(&current, &profile, mode, state.catalog.as_ref())
        .map_err(ApiError::from_engine)?;

    // Drift is reported against the freshly derived target; for a
    // constructed portfolio the metrics describe the target itself.
    let allocation = engine::derive_target(&profile);
    let measured = match mode {
        PlanMode::Construct => &outcome.target,
        PlanMode::Rebalance => &current,
    };
    let metrics = engine::analyze_with_baseline(
        measured,
        Some(&profile),
        state.catalog.as_ref(),
        Some(&allocation),
    )
    .map_err(ApiError::from_engine)?;

    let explanation = state.explanation(&profile, &metrics, &outcome.plan).await;

    Ok(Json(RecommendResponse {
        profile,
        metrics,
        plan: outcome.plan,
        explanation,
        operation_type: match mode {
            PlanMode::Construct => "construct",
            PlanMode::Rebalance => "rebalance",
        },
    }))
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    snapshot_id: Uuid,
    created_at: DateTime<Utc>,
}

async fn save_snapshot(
    State(state): State<AppState>,
    Json(req): Json<PortfolioRequest>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    validate_user_id(&req.user_id)?;
    let pool = state.pool()?;
    let profile = state.load_profile(&req.user_id).await?;

    let input = normalize_input(&req.holdings, req.cash_weight)?;
    let metrics = engine::analyze(&input.portfolio, Some(&profile), state.catalog.as_ref())
        .map_err(ApiError::from_engine)?;

    let (snapshot_id, created_at) = folio_core::storage::snapshots::append_snapshot(
        pool,
        &req.user_id,
        &input.portfolio,
        &metrics,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(SnapshotResponse {
        snapshot_id,
        created_at,
    }))
}

async fn portfolio_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<PortfolioSnapshot>>, ApiError> {
    validate_user_id(&user_id)?;
    let snapshots = folio_core::storage::snapshots::list_snapshots(state.pool()?, &user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(snapshots))
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    user_id: String,
    current_portfolio: PortfolioBody,
    recommended_portfolio: PortfolioBody,
}

#[derive(Debug, Deserialize)]
struct PortfolioBody {
    #[serde(default)]
    holdings: Vec<Holding>,
    #[serde(default)]
    cash_weight: f64,
}

async fn compare_portfolios(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<PortfolioComparison>, ApiError> {
    validate_user_id(&req.user_id)?;

    // Comparison is meaningful without a stored profile; constraint checks
    // are simply skipped in that case.
    let profile = match &state.pool {
        Some(pool) => folio_core::storage::profiles::get_profile(pool, &req.user_id)
            .await
            .map_err(ApiError::internal)?,
        None => None,
    };

    let current = normalize_input(&req.current_portfolio.holdings, req.current_portfolio.cash_weight)?;
    let recommended = normalize_input(
        &req.recommended_portfolio.holdings,
        req.recommended_portfolio.cash_weight,
    )?;

    let comparison = engine::compare(
        &current.portfolio,
        &recommended.portfolio,
        profile.as_ref(),
        state.catalog.as_ref(),
    )
    .map_err(ApiError::from_engine)?;

    Ok(Json(comparison))
}

// ---------------------------------------------------------------------------
// Ticker routes

#[derive(Debug, Deserialize)]
struct TickerLookupRequest {
    ticker: String,
}

#[derive(Debug, Serialize)]
struct TickerLookupResponse {
    ticker: String,
    known: bool,
    sector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    market_cap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    industry_risk: Option<String>,
}

/// Known tickers answer from the catalog; unknown ones go through the LLM
/// classifier, constrained to the catalog's sector names.
async fn lookup_ticker(
    State(state): State<AppState>,
    Json(req): Json<TickerLookupRequest>,
) -> Result<Json<TickerLookupResponse>, ApiError> {
    let ticker = req.ticker.trim().to_uppercase();
    if !is_valid_ticker(&ticker) {
        return Err(ApiError::bad_request(
            "ticker must be 1-5 uppercase alphanumerics",
        ));
    }

    if state.catalog.contains_ticker(&ticker) {
        let sector = state
            .catalog
            .resolve(&ticker)
            .unwrap_or(OTHER_SECTOR)
            .to_string();
        let risk_score = state.catalog.risk_score(&ticker);
        return Ok(Json(TickerLookupResponse {
            ticker,
            known: true,
            sector,
            name: None,
            risk_score,
            market_cap: None,
            industry_risk: None,
        }));
    }

    let llm = state.llm()?;
    let sector_names = state.catalog.sector_names();
    let classification = llm
        .classify_ticker(&ticker, &sector_names)
        .await
        .map_err(ApiError::internal)?;

    tracing::info!(ticker = %classification.ticker, sector = %classification.sector, "classified unknown ticker");
    Ok(Json(TickerLookupResponse {
        ticker: classification.ticker,
        known: false,
        sector: classification.sector,
        name: Some(classification.name),
        risk_score: None,
        market_cap: Some(classification.market_cap),
        industry_risk: Some(classification.industry_risk),
    }))
}

#[derive(Debug, Deserialize)]
struct TickerSectorsRequest {
    tickers: Vec<String>,
}

async fn ticker_sectors(
    State(state): State<AppState>,
    Json(req): Json<TickerSectorsRequest>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    if req.tickers.is_empty() {
        return Err(ApiError::bad_request("tickers must be a non-empty list"));
    }

    let mut out = BTreeMap::new();
    for ticker in &req.tickers {
        let upper = ticker.trim().to_uppercase();
        if upper.is_empty() {
            continue;
        }
        let sector = state.catalog.resolve(&upper).unwrap_or(OTHER_SECTOR);
        out.insert(upper, sector.to_string());
    }
    Ok(Json(out))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &folio_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
