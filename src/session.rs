// =============================================================================
// session.rs — THE SINGLE-FLIGHT SESSION CONTROLLER
// =============================================================================
//
// This is the piece worth engineering carefully; everything else is glue.
//
// The life of one lookup:
//
//   CACHE_CHECK ──hit──▶ return
//        │miss
//   AWAIT_SLOT (cooperative, no spinning)
//        │
//   CACHE_RECHECK ──hit──▶ release slot, return
//        │miss                    (someone computed it while we queued)
//   RUNNING ──▶ SUCCESS | TIMEOUT | INTERNAL_ERROR
//
// The recheck is mandatory, not an optimization: with a capacity-one gate,
// the request most likely to be queued behind you is a duplicate of you.
// Whoever wins the slot pays for the browser; everyone who lands after the
// answer is cached pays for a map read. (A follower that wakes BEFORE the
// answer lands still runs its own session — that's the documented behavior,
// not a bug. True per-key coalescing would need a pending-future registry
// this engine deliberately doesn't have.)
//
// The two invariants that keep this service alive:
//
// 1. The browser session is closed EXACTLY ONCE on every exit path —
//    success, per-step failure, and deadline kill alike. The deadline
//    cancellation drops the in-flight step mid-await; teardown runs
//    after, before anything else happens.
// 2. The slot is released exactly once, by RAII guard drop, after the
//    browser is gone. Leak either and every future request queues forever
//    behind a corpse.
//
// Per-case failures degrade ONE CaseRecord and keep going. Whole-session
// failures abort the lookup and cache nothing — failures age out of
// nothing, so they must never be remembered.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::browser::{CaseView, CourtBrowser, CourtSession, FillOutcome};
use crate::cache::LookupCache;
use crate::config::Config;
use crate::errors::{LookupError, REASON_DETAIL, REASON_NO_RESULTS, REASON_POPUP};
use crate::extract;
use crate::gate::SessionGate;
use crate::metrics::MetricsCollector;
use crate::models::{CaseRecord, Identifier, LookupResult, Outcome};

/// The engine: cache + gate + browser + counters, explicitly constructed at
/// startup and passed by reference to the request handlers. No module-level
/// globals anywhere — everything this service shares is a field on this
/// struct, visible and testable.
pub struct LookupEngine {
    config: Arc<Config>,
    cache: LookupCache,
    gate: SessionGate,
    browser: Arc<dyn CourtBrowser>,
    metrics: Arc<MetricsCollector>,
}

impl LookupEngine {
    pub fn new(
        config: Arc<Config>,
        browser: Arc<dyn CourtBrowser>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            cache: LookupCache::new(config.cache_ttl),
            gate: SessionGate::new(config.slot_capacity),
            config,
            browser,
            metrics,
        }
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Run one lookup through the full state machine. Returns the payload
    /// or a classified failure; resource cleanup has already happened by
    /// the time either comes back.
    pub async fn lookup(&self, ident: &Identifier) -> Result<LookupResult, LookupError> {
        let key = ident.cache_key();

        // CACHE_CHECK — the fast path. No slot, no browser, no waiting.
        if let Some(hit) = self.cache.get(&key) {
            self.metrics.increment_cache_hits();
            info!(documento = %ident, "Cache hit — answer served without a browser");
            return Ok(hit);
        }

        // AWAIT_SLOT — cooperatively parked until the one lane is free.
        let slot = self.gate.acquire().await;

        // CACHE_RECHECK — did whoever held the slot just answer our
        // question? The guard drops on this return path like every other,
        // releasing the slot.
        if let Some(hit) = self.cache.get(&key) {
            self.metrics.increment_cache_recheck_hits();
            info!(documento = %ident, "Recheck hit — queued behind our own answer");
            return Ok(hit);
        }

        // RUNNING — the expensive part, deadline-bounded.
        self.metrics.increment_lookups_started();
        let started = std::time::Instant::now();

        let mut session = self.browser.open_session().await.map_err(|e| {
            self.metrics.increment_lookups_failed();
            warn!(error = %e, "Browser failed to launch — lookup aborted before it began");
            LookupError::from(e)
        })?;

        let driven = tokio::time::timeout(
            self.config.lookup_deadline,
            self.drive(session.as_mut(), ident),
        )
        .await;

        // Teardown happens HERE, on every path, before the outcome is even
        // inspected. A timed-out drive was cancelled mid-step; the close
        // below is what actually reclaims the browser process. The slot
        // guard (`slot`) outlives the cache write on purpose: releasing it
        // earlier would let a queued duplicate wake, miss the recheck, and
        // run the same lookup again.
        if let Err(e) = session.close().await {
            warn!(error = %e, "Browser teardown reported an error (resources may lag)");
        }

        let outcome = match driven {
            Ok(Ok(result)) => {
                self.metrics.increment_lookups_succeeded();
                self.metrics
                    .add_cases_scraped(result.processos.len() as u64);
                self.cache.put(&key, result.clone());
                info!(
                    documento = %ident,
                    processos = result.processos.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    outcome = %Outcome::Success,
                    "Lookup complete"
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                self.metrics.increment_lookups_failed();
                warn!(
                    documento = %ident,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    outcome = %Outcome::InternalError,
                    "Lookup failed — nothing cached"
                );
                Err(e)
            }
            Err(_elapsed) => {
                self.metrics.increment_lookups_timed_out();
                warn!(
                    documento = %ident,
                    deadline_secs = self.config.lookup_deadline.as_secs(),
                    outcome = %Outcome::Timeout,
                    "Lookup exceeded deadline — browser torn down, nothing cached"
                );
                Err(LookupError::Timeout {
                    deadline: self.config.lookup_deadline,
                })
            }
        };

        drop(slot);
        outcome
    }

    /// The RUNNING phase: drive the browser through the whole search flow.
    /// Whole-session problems return Err; per-case problems degrade their
    /// record and keep walking.
    async fn drive(
        &self,
        session: &mut dyn CourtSession,
        ident: &Identifier,
    ) -> Result<LookupResult, LookupError> {
        session.navigate(&self.config.base_url).await?;

        if !session.select_document_kind(ident.kind).await? {
            // The site defaults to CPF when no radio is found; for a CNPJ
            // that default is wrong, but refusing to try helps nobody —
            // the zero-results banner will tell the truth either way.
            debug!(kind = %ident.kind, "Proceeding without a kind radio");
        }

        match session.fill_document(&ident.digits).await? {
            FillOutcome::Filled => {}
            FillOutcome::FieldNotFound => return Err(LookupError::FieldNotFound),
            FillOutcome::StayedEmpty => {
                return Err(LookupError::SubmitFailed {
                    reason: "cpf_nao_preencheu",
                })
            }
        }

        if !session.submit_search().await? {
            return Err(LookupError::SubmitFailed {
                reason: "nao_encontrei_botao_pesquisar",
            });
        }

        session.await_results().await?;

        // Enumerate case numbers, preserving discovery order, deduplicating
        // by value — the results table loves listing a case once per party.
        let anchors = session.case_anchor_texts().await?;
        let mut numbers: Vec<String> = Vec::new();
        for text in &anchors {
            if let Some(numero) = extract::find_cnj(text) {
                if !numbers.iter().any(|n| n == numero) {
                    numbers.push(numero.to_string());
                }
            }
        }
        debug!(anchors = anchors.len(), unique = numbers.len(), "Result anchors enumerated");

        let mut result = LookupResult::new(ident);

        if numbers.is_empty() {
            // A valid, meaningful outcome: the court says there's nothing
            // here (or the court is complaining about the query — either
            // way, its own words go in the aviso).
            let page = session.page_text().await.unwrap_or_default();
            result.aviso = Some(
                extract::find_site_banner(&page)
                    .unwrap_or_else(|| REASON_NO_RESULTS.to_string()),
            );
            return Ok(result);
        }

        for numero in numbers {
            let record = self.scrape_case(session, &numero).await;
            result.push_unique(record);
        }

        Ok(result)
    }

    /// Fetch one case's detail view and read it. This function does not
    /// fail: every problem in here is a per-case problem, and per-case
    /// problems become error-tagged stubs, never aborted lookups.
    async fn scrape_case(&self, session: &mut dyn CourtSession, numero: &str) -> CaseRecord {
        let mut view = match session.open_case(numero).await {
            Ok(Some(view)) => view,
            Ok(None) => {
                self.metrics.increment_popup_failures();
                warn!(numero = numero, "Detail popup never opened — recording stub");
                return CaseRecord::stub(numero, REASON_POPUP);
            }
            Err(e) => {
                self.metrics.increment_popup_failures();
                warn!(numero = numero, error = %e, "Detail popup click failed — recording stub");
                return CaseRecord::stub(numero, REASON_POPUP);
            }
        };

        let record = self.read_case(view.as_mut(), numero).await;

        if let Err(e) = view.close().await {
            debug!(numero = numero, error = %e, "Popup close error (non-fatal)");
        }

        record
    }

    /// Read metadata and movements out of an open detail view.
    async fn read_case(&self, view: &mut dyn CaseView, numero: &str) -> CaseRecord {
        view.activate_movements_tab().await;

        let text = match view.visible_text().await {
            Ok(text) => text,
            Err(e) => {
                self.metrics.increment_popup_failures();
                warn!(numero = numero, error = %e, "Detail view unreadable — recording stub");
                return CaseRecord::stub(numero, REASON_DETAIL);
            }
        };

        let meta = extract::extract_metadata(&text);
        let sets = view.movement_row_sets().await.unwrap_or_default();
        let movimentacoes = select_movements(sets, &text);

        CaseRecord {
            numero: numero.to_string(),
            assunto: meta.assunto,
            classe_judicial: meta.classe_judicial,
            data_distribuicao: meta.data_distribuicao,
            orgao_julgador: meta.orgao_julgador,
            jurisdicao: meta.jurisdicao,
            movimentacoes,
            erro: None,
        }
    }
}

/// Merge the per-strategy movement row sets: filter each, deduplicate across
/// all of them, and stop once a strategy pass has accumulated enough rows to
/// call the table found. When every strategy came up empty, fall back to
/// sieving the whole page's text.
fn select_movements(sets: Vec<Vec<String>>, page_text: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();

    for set in sets {
        for line in extract::filter_movements(set) {
            if seen.insert(line.clone()) {
                kept.push(line);
            }
        }
        if kept.len() >= extract::MOVEMENT_SUFFICIENT {
            break;
        }
    }

    if kept.is_empty() {
        return extract::movements_from_page_text(page_text);
    }
    kept
}
