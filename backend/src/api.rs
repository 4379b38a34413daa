use crate::attestation::{batch_count, generate_attestation};
use crate::config::{SovereignMode, VERSION};
use crate::db;
use crate::errors::ApiError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gallows_ledger::quorum::{QuorumCertificate, Verdict};
use gallows_ledger::{Article, Article12Event, ComplianceLedger, ComplianceStatus, EventDraft, LedgerError, LedgerTree};
use gallows_zk::constants::DEFAULT_BATCH_SIZE;
use gallows_zk::groth16::{decode_b64, deserialize_proof, deserialize_vk, encode_b64, serialize_vk, verify_batch_proof};
use gallows_zk::types::{BatchStats, FrHex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const REGULATOR: &str = "EU AI Office";

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/verify", post(verify_compliance))
        .route("/api/v1/certificate/:chain_id", get(get_certificate))
        .route("/api/v1/whistleblower", post(submit_whistleblower_report))
        .route("/api/v1/judge/ruling", post(issue_judgment))
        .route("/api/v1/quorum/verify", post(quorum_verify))
        .route("/api/v1/attestations", post(create_attestation))
        .route("/api/v1/verify/batch", post(verify_batch))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/", get(root))
        .route("/mode", get(get_mode))
        .route("/health", get(health_check))
        .route("/api/v1/red-list", get(get_red_list))
        .route("/api/v1/judge/rulings", get(get_judgments))
        .route("/api/v1/compliance/mapping", get(get_compliance_mapping))
        .route("/api/v1/audit/:chain_id", get(get_audit_trail))
        .route("/api/v1/proof/verify", post(verify_ledger_proof))
        .route("/api/v1/proof/:chain_id/:index", get(get_inclusion_proof))
        .route("/api/v1/consistency/:chain_id", get(get_consistency_proof))
        .route("/api/v1/quorum/nodes", get(get_quorum_nodes))
        .route("/api/v1/quorum/certificate/verify", post(verify_quorum_certificate))
        .route("/api/v1/zk/vk", get(get_vk))
        .route("/api/v1/attestations/:id", get(get_attestation))
        .route("/api/v1/attestations/:id/batches", get(list_batches))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == state.config.api_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!(path = %request.uri().path(), "unauthorized access attempt");
    Err(ApiError::Unauthorized)
}

fn short_id(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}

async fn require_ledger(state: &AppState, chain_id: &str) -> Result<ComplianceLedger, ApiError> {
    db::load_ledger(&state.db, chain_id, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chain not found".to_string()))
}

async fn require_tree(state: &AppState, chain_id: &str) -> Result<LedgerTree, ApiError> {
    db::load_tree(&state.db, chain_id, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chain not found".to_string()))
}

/// Chain ids end up in URL paths, so providers are limited to a safe alphabet.
fn chain_id_for(provider: &str) -> Result<String, ApiError> {
    let provider = provider.trim();
    if provider.is_empty() {
        return Err(ApiError::BadRequest("model_provider must not be empty".to_string()));
    }
    if !provider.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(ApiError::BadRequest(
            "model_provider may only contain ASCII letters, digits, '-', '_' and '.'".to_string(),
        ));
    }
    Ok(format!("chain-{}", provider.to_ascii_lowercase()))
}

// --- service info ---

async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "Digital Gallows API - TRIO COMPLETE".to_string(),
        version: VERSION.to_string(),
        mode: state.config.mode,
        status: "OPERATIONAL".to_string(),
        message: "THE TRIO IS COMPLETE. Police + Lawyer + Judge.".to_string(),
    })
}

async fn get_mode(State(state): State<AppState>) -> Json<ModeResponse> {
    let mode = state.config.mode;
    let profile = mode.profile();
    Json(ModeResponse {
        mode,
        description: profile.description.to_string(),
        verification_type: mode.verification_type().to_string(),
        config: profile,
    })
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        mode: state.config.mode,
        ledgers_active: db::count_chains(&state.db).await?,
        violations_recorded: db::count_violations(&state.db).await?,
        judgments_issued: db::count_judgments(&state.db).await?,
    }))
}

async fn get_compliance_mapping(State(state): State<AppState>) -> Json<ComplianceMappingResponse> {
    let mode = state.config.mode;
    Json(ComplianceMappingResponse {
        mode,
        articles: mode
            .article_mapping()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        verification_type: mode.verification_type().to_string(),
        can_expose_violations: mode.can_expose_violations(),
        is_public_registry: mode.is_public_registry(),
    })
}

// --- ledger ---

async fn verify_compliance(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Result<Json<VerifyResponse>, ApiError> {
    let article = Article::try_from(req.article_reference)?;
    let chain_id = chain_id_for(&req.model_provider)?;

    let mode = state.config.mode;
    db::ensure_chain(&state.db, &chain_id).await?;

    let status = req.compliance_status;
    let event = Article12Event::from_draft(
        EventDraft {
            model_id: req.model_id.clone(),
            input_data: req.input_hash,
            output_data: req.output_hash,
            compliance_status: status,
            risk_level: req.risk_level,
            article_reference: article,
            system_purpose: req.system_purpose,
            deployment_context: req.deployment_context,
            oversight_mechanism: req.oversight_mechanism,
        },
        Utc::now(),
    );
    let event_hash = event.event_hash()?;
    let seq = db::append_event(&state.db, &chain_id, &event, &event_hash).await?;

    // Root of the ledger as of this event.
    let tree = db::load_tree(&state.db, &chain_id, Some(seq + 1))
        .await?
        .ok_or(ApiError::Internal)?;

    tracing::info!(%chain_id, seq, status = %status, "recorded compliance event");

    let mut response = VerifyResponse {
        success: true,
        mode,
        event_id: event.event_id.clone(),
        event_index: seq,
        chain_id: chain_id.clone(),
        root_hash: tree.root_hex(),
        timestamp: event.timestamp.clone(),
        compliance_status: None,
        message: None,
        public_ledger: None,
        certificate_url: None,
        violation_id: None,
        alert_sent_to: None,
    };

    if !mode.can_expose_violations() {
        response.compliance_status = Some(status);
        response.message = Some("Verification complete. Results private.".to_string());
        return Ok(Json(response));
    }

    response.public_ledger = Some(true);
    response.certificate_url = Some(format!("/api/v1/certificate/{chain_id}"));

    if status == ComplianceStatus::Fail {
        let violation = Violation {
            violation_id: short_id("VIOL"),
            source: ViolationSource::Ledger,
            model_id: req.model_id,
            provider: req.model_provider,
            article: Some(article.number().into()),
            violation_type: None,
            evidence_hash: event_hash,
            severity: None,
            status: None,
            timestamp: Utc::now(),
            reported_by: "digital-gallows".to_string(),
            mode,
        };
        db::insert_violation(&state.db, &violation).await?;

        tracing::warn!(violation_id = %violation.violation_id, %chain_id, "violation added to red list");
        response.violation_id = Some(violation.violation_id);
        response.alert_sent_to = Some(REGULATOR.to_string());
    }

    Ok(Json(response))
}

async fn get_certificate(State(state): State<AppState>, Path(chain_id): Path<String>) -> Result<Json<CertificateResponse>, ApiError> {
    let ledger = require_ledger(&state, &chain_id).await?;
    let mode = state.config.mode;

    Ok(Json(CertificateResponse {
        certificate: ledger.certificate(Utc::now()),
        mode,
        is_public: mode.is_public_registry(),
    }))
}

async fn get_audit_trail(State(state): State<AppState>, Path(chain_id): Path<String>) -> Result<Json<AuditResponse>, ApiError> {
    let ledger = require_ledger(&state, &chain_id).await?;
    let mode = state.config.mode;

    Ok(Json(AuditResponse {
        audit: ledger.audit_trail(Utc::now()),
        mode,
        is_public: mode.is_public_registry(),
    }))
}

async fn get_inclusion_proof(
    State(state): State<AppState>,
    Path((chain_id, index)): Path<(String, u64)>,
) -> Result<Json<gallows_ledger::InclusionProof>, ApiError> {
    let tree = require_tree(&state, &chain_id).await?;
    Ok(Json(tree.inclusion_proof(index)?))
}

async fn get_consistency_proof(
    State(state): State<AppState>,
    Path(chain_id): Path<String>,
    Query(params): Query<ConsistencyParams>,
) -> Result<Json<gallows_ledger::ConsistencyProof>, ApiError> {
    let tree = require_tree(&state, &chain_id).await?;
    Ok(Json(tree.consistency_proof(params.old_size)?))
}

async fn verify_ledger_proof(Json(req): Json<ProofVerifyRequest>) -> Result<Json<ProofVerifyResponse>, ApiError> {
    let ok = match req {
        ProofVerifyRequest::Inclusion(proof) => proof.verify()?,
        ProofVerifyRequest::Consistency(proof) => proof.verify()?,
    };
    Ok(Json(ProofVerifyResponse { ok }))
}

// --- red list / whistleblower ---

async fn submit_whistleblower_report(
    State(state): State<AppState>,
    Json(report): Json<WhistleblowerReport>,
) -> Result<Json<WhistleblowerResponse>, ApiError> {
    let mode = state.config.mode;
    if !mode.can_expose_violations() {
        return Err(ApiError::Forbidden("Whistleblower reports disabled in SHIELD mode".to_string()));
    }

    let violation = Violation {
        violation_id: short_id("RPT"),
        source: ViolationSource::Whistleblower,
        model_id: report.model_id,
        provider: report.provider,
        article: None,
        violation_type: Some(report.violation_type),
        evidence_hash: report.evidence_hash,
        severity: Some(report.severity),
        status: Some("RECEIVED".to_string()),
        timestamp: Utc::now(),
        reported_by: if report.anonymous { "anonymous" } else { "whistleblower" }.to_string(),
        mode,
    };
    db::insert_violation(&state.db, &violation).await?;

    tracing::info!(report_id = %violation.violation_id, "whistleblower report received");

    let regulators_notified = if mode == SovereignMode::Sword { vec![REGULATOR.to_string()] } else { Vec::new() };

    Ok(Json(WhistleblowerResponse {
        success: true,
        report_id: violation.violation_id,
        status: "RECEIVED".to_string(),
        action_taken: "Violation recorded to public ledger".to_string(),
        regulators_notified,
        mode,
    }))
}

async fn get_red_list(State(state): State<AppState>) -> Result<Json<RedListResponse>, ApiError> {
    let mode = state.config.mode;
    if !mode.can_expose_violations() {
        return Err(ApiError::Forbidden("Red list hidden in SHIELD mode".to_string()));
    }

    let violations = db::list_violations(&state.db).await?;
    Ok(Json(RedListResponse {
        mode,
        total_violations: violations.len() as u64,
        violations,
    }))
}

// --- judge ---

async fn issue_judgment(State(state): State<AppState>, Json(req): Json<JudgeRulingRequest>) -> Result<Json<JudgeRulingResponse>, ApiError> {
    if state.config.mode != SovereignMode::Judge {
        return Err(ApiError::Forbidden("Judge rulings require JUDGE mode".to_string()));
    }
    let article = Article::try_from(req.article)?;
    if req.question.trim().is_empty() || req.ruling.trim().is_empty() {
        return Err(ApiError::BadRequest("question and ruling must not be empty".to_string()));
    }

    let judgment = db::insert_judgment(
        &state.db,
        Judgment {
            judgment_id: short_id("JUD"),
            article: article.number().into(),
            question: req.question,
            ruling: req.ruling,
            precedent_cases: req.precedent_cases,
            precedent: String::new(),
            issued_at: Utc::now(),
            authority: "Digital Gallows".to_string(),
            status: "BINDING".to_string(),
        },
    )
    .await?;

    tracing::info!(judgment_id = %judgment.judgment_id, precedent = %judgment.precedent, "ruling issued");

    Ok(Json(JudgeRulingResponse {
        success: true,
        judgment_id: judgment.judgment_id,
        status: judgment.status,
        message: "Ruling issued. This interpretation is now precedent.".to_string(),
        precedent: judgment.precedent,
    }))
}

async fn get_judgments(State(state): State<AppState>) -> Result<Json<RulingsResponse>, ApiError> {
    if state.config.mode != SovereignMode::Judge {
        return Err(ApiError::Forbidden("Judgments require JUDGE mode".to_string()));
    }

    let rulings = db::list_judgments(&state.db).await?;
    Ok(Json(RulingsResponse {
        mode: SovereignMode::Judge,
        total_judgments: rulings.len() as u64,
        rulings,
    }))
}

// --- quorum ---

async fn get_quorum_nodes(State(state): State<AppState>) -> Json<QuorumNodesResponse> {
    Json(QuorumNodesResponse {
        threshold: state.quorum.threshold(),
        total_nodes: state.quorum.total_nodes(),
        nodes: state.quorum.nodes(),
    })
}

async fn quorum_verify(State(state): State<AppState>, Json(req): Json<QuorumVerifyRequest>) -> Result<Json<QuorumVerifyResponse>, ApiError> {
    let request = state.quorum.request(req.model_id, req.inference_hash, req.criteria);

    let response = match state.quorum.verify(&request, &req.offline_nodes) {
        Ok(certificate) => {
            let (status, reason) = match certificate.verdict {
                Verdict::Verified => (QuorumOutcome::Verified, None),
                Verdict::Failed => (QuorumOutcome::Failed, Some("Compliance criteria not met".to_string())),
            };
            QuorumVerifyResponse { request, status, reason, certificate: Some(certificate) }
        }
        Err(e @ LedgerError::InsufficientNodes { .. }) => QuorumVerifyResponse {
            request,
            status: QuorumOutcome::Failed,
            reason: Some(e.to_string()),
            certificate: None,
        },
        Err(e) => return Err(e.into()),
    };

    tracing::info!(request_id = %response.request.request_id, status = ?response.status, "quorum round finished");
    Ok(Json(response))
}

async fn verify_quorum_certificate(
    State(state): State<AppState>,
    Json(certificate): Json<QuorumCertificate>,
) -> Result<Json<QuorumCertificateCheckResponse>, ApiError> {
    let registry = state.quorum.registry();
    let valid_signatures = certificate.valid_signatures(&registry)?;
    let ok = certificate.verify(&registry)?;

    Ok(Json(QuorumCertificateCheckResponse {
        ok,
        valid_signatures,
        threshold: registry.threshold.max(certificate.threshold),
    }))
}

// --- zk attestations ---

async fn get_vk(State(state): State<AppState>) -> Result<Json<ZkVkResponse>, ApiError> {
    let keys = state.ensure_keys().await?;
    let vk_bytes = serialize_vk(keys.vk.as_ref())?;

    Ok(Json(ZkVkResponse {
        curve: "bn254".to_string(),
        proof_system: "groth16".to_string(),
        batch_size: keys.batch_size as u64,
        vk_b64: encode_b64(&vk_bytes),
    }))
}

async fn create_attestation(
    State(state): State<AppState>,
    Json(req): Json<AttestationCreateRequest>,
) -> Result<Json<AttestationCreateResponse>, ApiError> {
    let ledger = require_ledger(&state, &req.chain_id).await?;
    if ledger.is_empty() {
        return Err(ApiError::Conflict("chain has no events to attest".to_string()));
    }

    let attestation_id = Uuid::new_v4();
    let event_count = ledger.len();
    db::insert_attestation(
        &state.db,
        attestation_id,
        &req.chain_id,
        event_count,
        &ledger.root_hex(),
        DEFAULT_BATCH_SIZE as u64,
    )
    .await?;

    // Start background proving.
    tokio::spawn(generate_attestation::<DEFAULT_BATCH_SIZE>(
        state.clone(),
        attestation_id,
        req.chain_id,
        event_count,
    ));

    Ok(Json(AttestationCreateResponse {
        attestation_id,
        event_count,
        batches_total: batch_count(event_count, DEFAULT_BATCH_SIZE as u64),
    }))
}

async fn get_attestation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<AttestationGetResponse>, ApiError> {
    let Some(row) = db::get_attestation(&state.db, id).await? else {
        return Err(ApiError::NotFound("attestation not found".to_string()));
    };

    let mut status = AttestationStatus::from_db(&row.status);
    if status == AttestationStatus::Ready && row.expires_at.is_some_and(|t| t <= Utc::now()) {
        status = AttestationStatus::Expired;
    }

    let batches_done = db::count_batches_done(&state.db, id).await?;
    let compliance_level = row
        .stats
        .as_ref()
        .filter(|s| s.total() > 0)
        .map(|s| 100.0 * s.passed() as f64 / s.total() as f64);

    Ok(Json(AttestationGetResponse {
        attestation_id: id,
        chain_id: row.chain_id,
        created_at: row.created_at,
        expires_at: row.expires_at,
        status,
        mode: state.config.mode,
        event_count: row.event_count,
        ledger_root: row.ledger_root,
        batch_size: row.batch_size,
        batches_total: batch_count(row.event_count, row.batch_size),
        batches_done,
        attestation_commitment_hex: row.commitment_hex,
        pass_by_article: row.stats.as_ref().map(|s| s.pass_by_article),
        total_by_article: row.stats.as_ref().map(|s| s.total_by_article),
        compliance_level,
        error: row.error,
    }))
}

async fn list_batches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ListBatchesParams>,
) -> Result<Json<BatchListResponse>, ApiError> {
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(50).min(500);
    let include_proof = params.include_proof.unwrap_or(false);

    let Some(row) = db::get_attestation(&state.db, id).await? else {
        return Err(ApiError::NotFound("attestation not found".to_string()));
    };

    let rows = db::list_batches(&state.db, id, offset, limit, include_proof).await?;

    let mut batches = Vec::with_capacity(rows.len());
    for (batch_index, commitment_hex, stats, verified, proof_b64) in rows {
        batches.push(BatchListItem {
            batch_index,
            batch_commitment_hex: commitment_hex,
            pass_by_article: stats.pass_by_article,
            total_by_article: stats.total_by_article,
            verified,
            proof_b64,
        });
    }

    Ok(Json(BatchListResponse {
        attestation_id: id,
        offset,
        limit,
        batches_total: batch_count(row.event_count, row.batch_size),
        batches,
    }))
}

async fn verify_batch(Json(req): Json<VerifyBatchRequest>) -> Result<Json<VerifyBatchResponse>, ApiError> {
    let vk_bytes = decode_b64(&req.vk_b64).map_err(|_| ApiError::BadRequest("invalid vk_b64".to_string()))?;
    let proof_bytes = decode_b64(&req.proof_b64).map_err(|_| ApiError::BadRequest("invalid proof_b64".to_string()))?;

    let vk = deserialize_vk(&vk_bytes).map_err(|_| ApiError::BadRequest("invalid vk".to_string()))?;
    let proof = deserialize_proof(&proof_bytes).map_err(|_| ApiError::BadRequest("invalid proof".to_string()))?;

    let commitment = FrHex { hex: req.public_batch_commitment_hex }
        .to_fr()
        .map_err(|e| ApiError::BadRequest(format!("invalid commitment: {e}")))?;

    let stats = BatchStats {
        pass_by_article: req.public_pass_by_article,
        total_by_article: req.public_total_by_article,
    };

    let ok = verify_batch_proof(&vk, &proof, commitment, &stats).is_ok();

    Ok(Json(VerifyBatchResponse { ok }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::ATTESTATION_VALIDITY_DAYS;
    use crate::config::Config;
    use crate::state::ZkKeys;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gallows_ledger::quorum::QuorumNetwork;
    use gallows_zk::groth16::setup_keys;
    use http_body_util::BodyExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const KEY: &str = "test-key";
    const SMALL_BATCH: usize = 4;

    async fn test_app(mode: SovereignMode) -> (Router, AppState) {
        test_app_with_keys(mode, None).await
    }

    async fn test_app_with_keys(mode: SovereignMode, keys: Option<ZkKeys>) -> (Router, AppState) {
        let db = db::connect_in_memory().await.unwrap();
        db::init_schema(&db).await.unwrap();

        let config = Config { mode, api_key: KEY.to_string(), ..Config::default() };
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let quorum = QuorumNetwork::generate(config.quorum_threshold, config.quorum_node_ids(), &mut rng).unwrap();

        let state = match keys {
            Some(keys) => AppState::with_keys(db, config, quorum, keys),
            None => AppState::new(db, config, quorum),
        };
        (router(state.clone()), state)
    }

    fn small_keys(seed: u64) -> ZkKeys {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (pk, vk) = setup_keys::<SMALL_BATCH>(&mut rng).unwrap();
        ZkKeys { batch_size: SMALL_BATCH, pk: Arc::new(pk), vk: Arc::new(vk) }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>, key: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            req = req.header("X-API-KEY", key);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn verify_body(provider: &str, status: &str) -> Value {
        json!({
            "model_id": "gpt-x",
            "model_provider": provider,
            "input_hash": "prompt",
            "output_hash": "completion",
            "compliance_status": status,
            "article_reference": 13,
        })
    }

    #[tokio::test]
    async fn root_and_mode_describe_the_service() {
        let (app, _) = test_app(SovereignMode::Sword).await;

        let (status, body) = call(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "2.0.0-TRIO");
        assert_eq!(body["mode"], "SWORD");

        let (_, body) = call(&app, "GET", "/mode", None, None).await;
        assert_eq!(body["description"], "Police Mode - Enforce the Law");
        assert_eq!(body["config"]["alerting"], "whistleblower_eu");

        let (_, body) = call(&app, "GET", "/api/v1/compliance/mapping", None, None).await;
        assert_eq!(body["articles"]["article_13"], "Full transparency to EU");
        assert_eq!(body["is_public_registry"], true);
    }

    #[tokio::test]
    async fn protected_routes_require_api_key() {
        let (app, _) = test_app(SovereignMode::Shield).await;

        let (status, body) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "PASS")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "PASS")), Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/api/v1/certificate/chain-acme", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn shield_mode_keeps_results_private() {
        let (app, _) = test_app(SovereignMode::Shield).await;

        let (status, body) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "FAIL")), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain_id"], "chain-acme");
        assert_eq!(body["compliance_status"], "FAIL");
        assert_eq!(body["message"], "Verification complete. Results private.");
        assert!(body.get("violation_id").is_none());
        assert!(body.get("certificate_url").is_none());

        let (status, _) = call(&app, "GET", "/api/v1/red-list", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let report = json!({
            "model_id": "gpt-x", "provider": "Acme",
            "violation_type": "undisclosed_logging", "evidence_hash": "ab"
        });
        let (status, _) = call(&app, "POST", "/api/v1/whistleblower", Some(report), Some(KEY)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "GET", "/api/v1/judge/rulings", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, cert) = call(&app, "GET", "/api/v1/certificate/chain-acme", None, Some(KEY)).await;
        assert_eq!(cert["is_public"], false);
        assert_eq!(cert["mode"], "SHIELD");
    }

    #[tokio::test]
    async fn sword_mode_exposes_failures() {
        let (app, _) = test_app(SovereignMode::Sword).await;

        let (_, ok) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "PASS")), Some(KEY)).await;
        assert_eq!(ok["public_ledger"], true);
        assert_eq!(ok["certificate_url"], "/api/v1/certificate/chain-acme");
        assert!(ok.get("violation_id").is_none());

        let (_, failed) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "FAIL")), Some(KEY)).await;
        assert_eq!(failed["event_index"], 1);
        assert_eq!(failed["alert_sent_to"], "EU AI Office");
        let violation_id = failed["violation_id"].as_str().unwrap().to_string();
        assert!(violation_id.starts_with("VIOL-"));
        assert_eq!(violation_id.len(), 13);

        let (status, red) = call(&app, "GET", "/api/v1/red-list", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(red["total_violations"], 1);
        assert_eq!(red["violations"][0]["violation_id"], violation_id.as_str());
        assert_eq!(red["violations"][0]["article"], 13);
        assert_eq!(red["violations"][0]["reported_by"], "digital-gallows");

        // The evidence hash is the hash of the recorded event.
        let (_, audit) = call(&app, "GET", "/api/v1/audit/chain-acme", None, None).await;
        let (_, proof) = call(&app, "GET", "/api/v1/proof/chain-acme/1", None, None).await;
        assert_eq!(red["violations"][0]["evidence_hash"], proof["event_hash"]);
        assert_eq!(audit["ledger"]["latest_event_hash"], proof["event_hash"]);
        assert_eq!(audit["is_public"], true);

        let report = json!({
            "model_id": "gpt-x", "provider": "Acme",
            "violation_type": "undisclosed_logging", "evidence_hash": "ab"
        });
        let (status, body) = call(&app, "POST", "/api/v1/whistleblower", Some(report), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["report_id"].as_str().unwrap().starts_with("RPT-"));
        assert_eq!(body["regulators_notified"], json!(["EU AI Office"]));

        let (_, health) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(health["ledgers_active"], 1);
        assert_eq!(health["violations_recorded"], 2);
        assert_eq!(health["judgments_issued"], 0);
    }

    #[tokio::test]
    async fn verify_rejects_untracked_article() {
        let (app, _) = test_app(SovereignMode::Shield).await;
        let mut body = verify_body("Acme", "PASS");
        body["article_reference"] = json!(16);

        let (status, body) = call(&app, "POST", "/api/v1/verify", Some(body), Some(KEY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("16"));
    }

    #[tokio::test]
    async fn verify_rejects_providers_unsafe_for_urls() {
        let (app, _) = test_app(SovereignMode::Sword).await;

        for provider in ["Acme/Labs", "Acme Labs", "  ", "acme?x=1"] {
            let (status, _) = call(&app, "POST", "/api/v1/verify", Some(verify_body(provider, "PASS")), Some(KEY)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "provider {provider:?}");
        }

        let (status, body) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Open_AI.eu-1", "PASS")), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain_id"], "chain-open_ai.eu-1");

        let url = body["certificate_url"].as_str().unwrap().to_string();
        let (status, _) = call(&app, "GET", &url, None, Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health_chains(&app).await, 1);
    }

    async fn health_chains(app: &Router) -> u64 {
        let (_, health) = call(app, "GET", "/health", None, None).await;
        health["ledgers_active"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn certificate_reflects_pass_rate() {
        let (app, _) = test_app(SovereignMode::Judge).await;

        let (status, _) = call(&app, "GET", "/api/v1/certificate/chain-nobody", None, Some(KEY)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/v1/audit/chain-nobody", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for status in ["PASS", "PASS", "PASS", "PASS", "WARNING"] {
            call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", status)), Some(KEY)).await;
        }

        let (status, cert) = call(&app, "GET", "/api/v1/certificate/chain-acme", None, Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cert["total_events"], 5);
        assert_eq!(cert["compliance_level"], 80.0);
        assert_eq!(cert["status"], "COMPLIANT");
        assert_eq!(cert["articles_covered"], json!([13]));
        assert_eq!(cert["mode"], "JUDGE");
    }

    #[tokio::test]
    async fn ledger_proofs_round_trip_through_the_api() {
        let (app, _) = test_app(SovereignMode::Sword).await;

        let mut roots = Vec::new();
        for _ in 0..6 {
            let (_, body) = call(&app, "POST", "/api/v1/verify", Some(verify_body("Acme", "PASS")), Some(KEY)).await;
            roots.push(body["root_hash"].as_str().unwrap().to_string());
        }

        let (status, mut inclusion) = call(&app, "GET", "/api/v1/proof/chain-acme/2", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inclusion["tree_size"], 6);
        assert_eq!(inclusion["root"], roots[5].as_str());

        inclusion["kind"] = json!("inclusion");
        let (_, result) = call(&app, "POST", "/api/v1/proof/verify", Some(inclusion.clone()), None).await;
        assert_eq!(result["ok"], true);

        inclusion["event_index"] = json!(3);
        let (_, result) = call(&app, "POST", "/api/v1/proof/verify", Some(inclusion), None).await;
        assert_eq!(result["ok"], false);

        let (_, mut consistency) = call(&app, "GET", "/api/v1/consistency/chain-acme?old_size=3", None, None).await;
        // The root reported when event 3 was recorded is the old root.
        assert_eq!(consistency["old_root"], roots[2].as_str());
        consistency["kind"] = json!("consistency");
        let (_, result) = call(&app, "POST", "/api/v1/proof/verify", Some(consistency), None).await;
        assert_eq!(result["ok"], true);

        let (status, _) = call(&app, "GET", "/api/v1/proof/chain-acme/6", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/v1/proof/chain-nobody/0", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/v1/consistency/chain-acme?old_size=0", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn judge_mode_issues_numbered_precedents() {
        let (app, _) = test_app(SovereignMode::Judge).await;
        let year = Utc::now().format("%Y").to_string();

        let ruling = json!({
            "article": 14,
            "question": "Does a kill switch satisfy human oversight?",
            "ruling": "Only if it is reachable by a natural person at all times.",
        });
        let (status, first) = call(&app, "POST", "/api/v1/judge/ruling", Some(ruling.clone()), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "BINDING");
        assert_eq!(first["precedent"], format!("ATA-{year}-0001"));

        let (_, second) = call(&app, "POST", "/api/v1/judge/ruling", Some(ruling), Some(KEY)).await;
        assert_eq!(second["precedent"], format!("ATA-{year}-0002"));

        let bad = json!({ "article": 11, "question": "q", "ruling": "r" });
        let (status, _) = call(&app, "POST", "/api/v1/judge/ruling", Some(bad), Some(KEY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, rulings) = call(&app, "GET", "/api/v1/judge/rulings", None, None).await;
        assert_eq!(rulings["total_judgments"], 2);
        assert_eq!(rulings["rulings"][0]["authority"], "Digital Gallows");
        assert_eq!(rulings["rulings"][1]["judgment_id"], second["judgment_id"]);

        // Whistleblower reports are accepted but not forwarded outside SWORD.
        let report = json!({
            "model_id": "gpt-x", "provider": "Acme",
            "violation_type": "opaque_scoring", "evidence_hash": "cd", "anonymous": false
        });
        let (_, body) = call(&app, "POST", "/api/v1/whistleblower", Some(report), Some(KEY)).await;
        assert_eq!(body["regulators_notified"], json!([]));
    }

    #[tokio::test]
    async fn rulings_are_forbidden_outside_judge_mode() {
        let (app, _) = test_app(SovereignMode::Sword).await;
        let ruling = json!({ "article": 12, "question": "q", "ruling": "r" });
        let (status, _) = call(&app, "POST", "/api/v1/judge/ruling", Some(ruling), Some(KEY)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn quorum_certificates_can_be_checked_independently() {
        let (app, _) = test_app(SovereignMode::Shield).await;

        let (_, nodes) = call(&app, "GET", "/api/v1/quorum/nodes", None, None).await;
        assert_eq!(nodes["threshold"], 3);
        assert_eq!(nodes["nodes"].as_array().unwrap().len(), 5);

        let req = json!({ "model_id": "gpt-x", "inference_hash": "abc" });
        let (status, body) = call(&app, "POST", "/api/v1/quorum/verify", Some(req), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "VERIFIED");
        assert!(body["request"]["request_id"].as_str().unwrap().starts_with("REQ-"));

        let certificate = body["certificate"].clone();
        assert_eq!(certificate["signatures"].as_array().unwrap().len(), 5);

        let (_, check) = call(&app, "POST", "/api/v1/quorum/certificate/verify", Some(certificate.clone()), None).await;
        assert_eq!(check["ok"], true);
        assert_eq!(check["valid_signatures"], 5);

        // Dropping signatures below the threshold invalidates it.
        let mut thin = certificate;
        thin["signatures"] = json!(thin["signatures"].as_array().unwrap()[..2].to_vec());
        let (_, check) = call(&app, "POST", "/api/v1/quorum/certificate/verify", Some(thin), None).await;
        assert_eq!(check["ok"], false);
        assert_eq!(check["valid_signatures"], 2);
    }

    #[tokio::test]
    async fn quorum_reports_insufficient_nodes() {
        let (app, _) = test_app(SovereignMode::Shield).await;

        let req = json!({
            "model_id": "gpt-x",
            "inference_hash": "abc",
            "offline_nodes": ["node-1", "node-2", "node-3"],
        });
        let (status, body) = call(&app, "POST", "/api/v1/quorum/verify", Some(req), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["reason"], "Insufficient nodes: 2/3");
        assert!(body.get("certificate").is_none());

        let req = json!({ "model_id": "gpt-x", "inference_hash": "abc", "offline_nodes": ["node-99"] });
        let (status, _) = call(&app, "POST", "/api/v1/quorum/verify", Some(req), Some(KEY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = json!({
            "model_id": "gpt-x",
            "inference_hash": "abc",
            "criteria": { "oversight": false },
        });
        let (_, body) = call(&app, "POST", "/api/v1/quorum/verify", Some(req), Some(KEY)).await;
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["certificate"]["compliance"]["article_14"], false);
    }

    #[tokio::test]
    async fn attestation_requires_a_non_empty_chain() {
        let (app, state) = test_app(SovereignMode::Sword).await;

        let (status, _) = call(&app, "POST", "/api/v1/attestations", Some(json!({ "chain_id": "chain-nobody" })), Some(KEY)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        db::ensure_chain(&state.db, "chain-empty").await.unwrap();
        let (status, _) = call(&app, "POST", "/api/v1/attestations", Some(json!({ "chain_id": "chain-empty" })), Some(KEY)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/v1/attestations/{}", Uuid::new_v4());
        let (status, _) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn attestation_reports_stored_batches() {
        let (app, state) = test_app(SovereignMode::Sword).await;
        let id = Uuid::new_v4();
        db::insert_attestation(&state.db, id, "chain-acme", 70, &"00".repeat(32), DEFAULT_BATCH_SIZE as u64)
            .await
            .unwrap();

        let mut stats = BatchStats::zero();
        stats.pass_by_article = [40, 0, 0, 0];
        stats.total_by_article = [64, 0, 0, 0];
        db::insert_batch(&state.db, id, 0, "ab", &stats, "cHJvb2Y=", true).await.unwrap();

        let (_, body) = call(&app, "GET", &format!("/api/v1/attestations/{id}"), None, None).await;
        assert_eq!(body["status"], "generating");
        assert_eq!(body["batches_total"], 2);
        assert_eq!(body["batches_done"], 1);

        let (_, list) = call(&app, "GET", &format!("/api/v1/attestations/{id}/batches"), None, None).await;
        assert_eq!(list["batches_total"], 2);
        assert_eq!(list["batches"][0]["pass_by_article"], json!([40, 0, 0, 0]));
        assert!(list["batches"][0]["proof_b64"].is_null());

        let uri = format!("/api/v1/attestations/{id}/batches?include_proof=true");
        let (_, list) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(list["batches"][0]["proof_b64"], "cHJvb2Y=");

        stats.pass_by_article = [60, 0, 0, 0];
        stats.total_by_article = [70, 0, 0, 0];
        db::set_attestation_ready(&state.db, id, "cd", &stats, Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        let (_, body) = call(&app, "GET", &format!("/api/v1/attestations/{id}"), None, None).await;
        assert_eq!(body["status"], "expired");
        assert_eq!(body["total_by_article"], json!([70, 0, 0, 0]));
    }

    #[tokio::test]
    async fn verify_batch_rejects_malformed_input() {
        let (app, _) = test_app(SovereignMode::Sword).await;
        let req = json!({
            "vk_b64": "***",
            "proof_b64": "",
            "public_batch_commitment_hex": "00",
            "public_pass_by_article": [0, 0, 0, 0],
            "public_total_by_article": [0, 0, 0, 0],
        });
        let (status, body) = call(&app, "POST", "/api/v1/verify/batch", Some(req), Some(KEY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid vk_b64");
    }
    async fn record_statuses(app: &Router, statuses: &[&str]) {
        for status in statuses {
            let (code, _) = call(app, "POST", "/api/v1/verify", Some(verify_body("Acme", status)), Some(KEY)).await;
            assert_eq!(code, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn attestation_proves_batches_that_verify_independently() {
        let (app, state) = test_app_with_keys(SovereignMode::Sword, Some(small_keys(11))).await;
        record_statuses(&app, &["PASS", "PASS", "FAIL", "PASS", "WARNING", "PASS"]).await;

        let tree = db::load_tree(&state.db, "chain-acme", None).await.unwrap().unwrap();
        let id = Uuid::new_v4();
        db::insert_attestation(&state.db, id, "chain-acme", 6, &tree.root_hex(), SMALL_BATCH as u64)
            .await
            .unwrap();
        generate_attestation::<SMALL_BATCH>(state.clone(), id, "chain-acme".to_string(), 6).await;

        let (status, body) = call(&app, "GET", &format!("/api/v1/attestations/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["ledger_root"], tree.root_hex().as_str());
        assert_eq!(body["batches_total"], 2);
        assert_eq!(body["batches_done"], 2);
        assert_eq!(body["pass_by_article"], json!([0, 4, 0, 0]));
        assert_eq!(body["total_by_article"], json!([0, 6, 0, 0]));
        assert!(body["attestation_commitment_hex"].is_string());

        let expires_at: chrono::DateTime<Utc> = serde_json::from_value(body["expires_at"].clone()).unwrap();
        assert!(expires_at - Utc::now() > chrono::Duration::days(ATTESTATION_VALIDITY_DAYS - 1));

        let (_, vk) = call(&app, "GET", "/api/v1/zk/vk", None, None).await;
        assert_eq!(vk["batch_size"], SMALL_BATCH);

        let uri = format!("/api/v1/attestations/{id}/batches?include_proof=true");
        let (_, list) = call(&app, "GET", &uri, None, None).await;
        let batch = &list["batches"][0];
        assert_eq!(batch["verified"], true);
        assert_eq!(batch["pass_by_article"], json!([0, 3, 0, 0]));
        assert_eq!(batch["total_by_article"], json!([0, 4, 0, 0]));
        assert_eq!(list["batches"][1]["total_by_article"], json!([0, 2, 0, 0]));

        let mut req = json!({
            "vk_b64": vk["vk_b64"],
            "proof_b64": batch["proof_b64"],
            "public_batch_commitment_hex": batch["batch_commitment_hex"],
            "public_pass_by_article": batch["pass_by_article"],
            "public_total_by_article": batch["total_by_article"],
        });
        let (status, result) = call(&app, "POST", "/api/v1/verify/batch", Some(req.clone()), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["ok"], true);

        // One extra PASS claimed for article 13.
        req["public_pass_by_article"] = json!([0, 4, 0, 0]);
        let (status, result) = call(&app, "POST", "/api/v1/verify/batch", Some(req), Some(KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["ok"], false);
    }

    #[tokio::test]
    async fn attestation_fails_closed_when_proofs_do_not_verify() {
        // Proving key and verifying key from different setups.
        let keys = ZkKeys { vk: small_keys(2).vk, ..small_keys(1) };
        let (app, state) = test_app_with_keys(SovereignMode::Shield, Some(keys)).await;
        record_statuses(&app, &["PASS", "FAIL"]).await;

        let id = Uuid::new_v4();
        db::insert_attestation(&state.db, id, "chain-acme", 2, &"00".repeat(32), SMALL_BATCH as u64)
            .await
            .unwrap();
        generate_attestation::<SMALL_BATCH>(state.clone(), id, "chain-acme".to_string(), 2).await;

        let (_, body) = call(&app, "GET", &format!("/api/v1/attestations/{id}"), None, None).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["batches_done"], 0);
        assert!(body["error"].is_string());
        assert!(body["attestation_commitment_hex"].is_null());
    }

    #[tokio::test]
    async fn attestation_fails_when_keys_do_not_match_batch_size() {
        let (app, state) = test_app_with_keys(SovereignMode::Shield, Some(small_keys(3))).await;
        record_statuses(&app, &["PASS"]).await;

        let id = Uuid::new_v4();
        db::insert_attestation(&state.db, id, "chain-acme", 1, &"00".repeat(32), 8).await.unwrap();
        generate_attestation::<8>(state.clone(), id, "chain-acme".to_string(), 1).await;

        let (_, body) = call(&app, "GET", &format!("/api/v1/attestations/{id}"), None, None).await;
        assert_eq!(body["status"], "failed");
    }
}
