// =============================================================================
// browser.rs — THE CHROMIUM PUPPETEERING DEPARTMENT
// =============================================================================
//
// Everything the engine knows how to ask of a browser lives behind three
// traits: a launcher, a session, and a case view. The session controller
// speaks only to the traits; the fact that the production implementation
// is an entire Chromium process on a leash (via the Chrome DevTools
// Protocol) is this module's private shame.
//
// The element-location logic is deliberately structured as ORDERED STRATEGY
// LISTS, tried in sequence, first success short-circuiting. The target site
// has shipped at least three different renderings of its own search form,
// and the only honest way to cope is to keep the fallbacks lined up and
// swappable instead of betting the engine on one selector. When the site
// changes again — and it will — the fix belongs in these lists.
//
// All DOM work happens through injected JavaScript evaluated in the page.
// The CDP gives us typed element handles too, but the form lives inside a
// same-origin iframe maze, and one JS walk over every reachable document
// beats a dozen protocol round-trips per probe.
// =============================================================================

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::BrowserError;
use crate::models::DocKind;

/// Per-step wait tuning. The defaults are the empirically-beaten values
/// that survived contact with the real site; the config layer can override
/// every one of them.
#[derive(Debug, Clone)]
pub struct BrowserTuning {
    /// Settle delay after initial navigation, before probing the form.
    pub initial_delay: Duration,
    /// How long to wait for the results spinner to SHOW UP.
    pub spinner_visible: Duration,
    /// How long to wait for a visible spinner to GO AWAY.
    pub spinner_hidden: Duration,
    /// Fallback wait when no spinner ever appeared — the site is loading
    /// something, we just can't see what.
    pub grace_delay: Duration,
    /// How long to wait for a case-detail popup window to materialize.
    pub popup_timeout: Duration,
    /// Settle delay after a popup opens, before reading its text.
    pub popup_settle: Duration,
    /// Pause between keystrokes while typing the document digits. The
    /// site's input mask drops characters when they arrive faster than a
    /// human could plausibly type them.
    pub type_delay: Duration,
    /// Path to the Chrome/Chromium executable. None = let chromiumoxide
    /// auto-detect.
    pub chrome_path: Option<String>,
}

impl Default for BrowserTuning {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1200),
            spinner_visible: Duration::from_secs(2),
            spinner_hidden: Duration::from_secs(25),
            grace_delay: Duration::from_secs(8),
            popup_timeout: Duration::from_secs(20),
            popup_settle: Duration::from_millis(1200),
            type_delay: Duration::from_millis(40),
            chrome_path: None,
        }
    }
}

/// Outcome of trying to put digits into the document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Digits are in the field and the field agrees they're there.
    Filled,
    /// No strategy could locate the input at all.
    FieldNotFound,
    /// We found the field and typed, but reading it back gave us nothing —
    /// the site's input mask swallowed the keystrokes.
    StayedEmpty,
}

/// The launcher: one call, one fresh browser session.
#[async_trait]
pub trait CourtBrowser: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn CourtSession>, BrowserError>;
}

/// One live browser session against the court site. Implementations must
/// make `close` idempotent and safe to call on any half-driven state —
/// the controller calls it on every exit path, including after a deadline
/// kill, and counts on it actually releasing the underlying process.
#[async_trait]
pub trait CourtSession: Send {
    /// Navigate to the search form and let it settle.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Pick the CPF/CNPJ radio control for `kind`. Returns false when no
    /// strategy found a radio — non-fatal, the site defaults to CPF.
    async fn select_document_kind(&mut self, kind: DocKind) -> Result<bool, BrowserError>;

    /// Locate the document input (searching every reachable frame) and
    /// type the digits into it.
    async fn fill_document(&mut self, digits: &str) -> Result<FillOutcome, BrowserError>;

    /// Click the search button. Returns false when no button was found.
    async fn submit_search(&mut self) -> Result<bool, BrowserError>;

    /// Wait for the results to finish loading: spinner appears-then-clears,
    /// or the fixed grace delay when no spinner shows.
    async fn await_results(&mut self) -> Result<(), BrowserError>;

    /// The visible text of every anchor on the results page that looks like
    /// it names a case.
    async fn case_anchor_texts(&mut self) -> Result<Vec<String>, BrowserError>;

    /// The whole page's visible text (for the "no results" banner hunt).
    async fn page_text(&mut self) -> Result<String, BrowserError>;

    /// Open the detail view for a case number. Ok(None) means the popup
    /// never appeared even after the fallback click — a per-case failure,
    /// not a session failure.
    async fn open_case(&mut self, numero: &str)
        -> Result<Option<Box<dyn CaseView>>, BrowserError>;

    /// Tear the session down. Idempotent; must release the browser process.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// An open case-detail view (a popup window on the real site).
#[async_trait]
pub trait CaseView: Send {
    /// Best-effort click on the "Movimentações" tab so the movement table
    /// actually renders. Failure is fine — some renderings show it inline.
    async fn activate_movements_tab(&mut self);

    /// The detail view's visible text.
    async fn visible_text(&mut self) -> Result<String, BrowserError>;

    /// Candidate movement rows, one set per container strategy, in strategy
    /// order. Row text is raw; filtering is the extraction layer's job.
    async fn movement_row_sets(&mut self) -> Result<Vec<Vec<String>>, BrowserError>;

    /// Close the view. Idempotent.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

// =============================================================================
// The chromiumoxide implementation
// =============================================================================

/// Launches one Chromium per session. No pooling, no tab reuse: the session
/// gate upstream guarantees at most one of these lives at a time, and a
/// fresh process per lookup means a hung lookup can't poison the next one.
pub struct ChromiumBrowser {
    tuning: BrowserTuning,
}

impl ChromiumBrowser {
    pub fn new(tuning: BrowserTuning) -> Self {
        Self { tuning }
    }
}

#[async_trait]
impl CourtBrowser for ChromiumBrowser {
    async fn open_session(&self) -> Result<Box<dyn CourtSession>, BrowserError> {
        debug!("Launching headless browser");

        let mut builder = BrowserConfig::builder()
            .window_size(1280, 720)
            // The standard scraping litany. --no-sandbox because this runs
            // in containers; --disable-dev-shm-usage because /dev/shm on a
            // small VPS is a rounding error.
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--mute-audio")
            .arg("--no-first-run");

        if let Some(ref path) = self.tuning.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The CDP event pump. Dies on its own when the browser closes.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {}", e);
                }
            }
            debug!("Browser CDP handler exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(format!("initial tab: {}", e)))?;

        Ok(Box::new(CdpSession {
            browser: Some(browser),
            handler_task: Some(handler_task),
            page,
            tuning: self.tuning.clone(),
        }))
    }
}

/// Marker attribute stamped on the located document input so later steps
/// can re-find it without re-running the strategy list.
const INPUT_MARK: &str = "data-pje-engine-input";

struct CdpSession {
    browser: Option<Browser>,
    handler_task: Option<tokio::task::JoinHandle<()>>,
    page: Page,
    tuning: BrowserTuning,
}

impl CdpSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, BrowserError> {
        let result = self
            .page
            .evaluate(js.to_string())
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Protocol(format!("evaluate result: {}", e)))
    }

    /// Target ids of every open page, for spotting popup arrivals.
    async fn target_ids(&self) -> Result<Vec<String>, BrowserError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("session already closed".into()))?;
        let pages = browser
            .pages()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(pages
            .iter()
            .map(|p| format!("{:?}", p.target_id()))
            .collect())
    }

    /// Wait for a page that wasn't in `before` to show up, or time out.
    async fn wait_for_new_page(
        &self,
        before: &[String],
    ) -> Result<Option<Page>, BrowserError> {
        let deadline = tokio::time::Instant::now() + self.tuning.popup_timeout;
        while tokio::time::Instant::now() < deadline {
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| BrowserError::Protocol("session already closed".into()))?;
            let pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            for p in pages {
                let id = format!("{:?}", p.target_id());
                if !before.contains(&id) {
                    return Ok(Some(p));
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Ok(None)
    }
}

/// Escape a value for embedding inside a single-quoted JS string literal.
fn js_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// JS prelude: walk the main document plus every reachable same-origin
/// frame document. Cross-origin frames throw on contentDocument access and
/// are silently skipped — nothing we need lives in one.
const ALL_DOCS_JS: &str = r#"
    function allDocs() {
        const docs = [document];
        const walk = (doc) => {
            for (const f of doc.querySelectorAll('iframe, frame')) {
                try {
                    if (f.contentDocument) {
                        docs.push(f.contentDocument);
                        walk(f.contentDocument);
                    }
                } catch (e) { /* cross-origin, not ours */ }
            }
        };
        walk(document);
        return docs;
    }
    function isVisible(el) {
        if (!el) return false;
        const r = el.getBoundingClientRect ? el.getBoundingClientRect() : null;
        const style = el.ownerDocument.defaultView.getComputedStyle(el);
        return style.display !== 'none' && style.visibility !== 'hidden'
            && (!r || (r.width > 0 && r.height > 0));
    }
"#;

/// The ordered radio-location strategies. Three ways the form has been
/// observed to expose its CPF/CNPJ toggle; first hit wins. Reorder here if
/// a deployment's site rendering prefers a different one.
const RADIO_STRATEGIES: &[&str] = &["label-text", "attribute", "ordinal"];

#[async_trait]
impl CourtSession for CdpSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        // JSF pages keep assembling themselves well past the load event.
        tokio::time::sleep(self.tuning.initial_delay).await;
        Ok(())
    }

    async fn select_document_kind(&mut self, kind: DocKind) -> Result<bool, BrowserError> {
        let keyword = match kind {
            DocKind::Cpf => "cpf",
            DocKind::Cnpj => "cnpj",
        };
        // CPF is the first radio in every rendering seen so far; CNPJ the
        // second. Only the ordinal strategy needs this.
        let ordinal = match kind {
            DocKind::Cpf => 0,
            DocKind::Cnpj => 1,
        };

        for strategy in RADIO_STRATEGIES {
            let js = format!(
                r#"(function() {{
                    {prelude}
                    const kw = '{kw}';
                    const strategy = '{strategy}';
                    for (const doc of allDocs()) {{
                        const radios = Array.from(doc.querySelectorAll("input[type='radio']"));
                        if (radios.length === 0) continue;
                        let target = null;
                        if (strategy === 'label-text') {{
                            for (const lab of doc.querySelectorAll('label')) {{
                                if ((lab.innerText || '').toLowerCase().includes(kw)) {{
                                    target = lab.htmlFor
                                        ? doc.getElementById(lab.htmlFor)
                                        : lab.querySelector("input[type='radio']");
                                    if (target) break;
                                }}
                            }}
                        }} else if (strategy === 'attribute') {{
                            target = radios.find(r =>
                                (r.value || '').toLowerCase().includes(kw) ||
                                (r.id || '').toLowerCase().includes(kw) ||
                                (r.name || '').toLowerCase().includes(kw)) || null;
                        }} else {{
                            target = radios[{ordinal}] || null;
                        }}
                        if (target && target.type === 'radio') {{
                            target.click();
                            target.checked = true;
                            target.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }}
                    }}
                    return false;
                }})()"#,
                prelude = ALL_DOCS_JS,
                kw = keyword,
                strategy = strategy,
                ordinal = ordinal,
            );

            if self.eval::<bool>(&js).await? {
                debug!(kind = %kind, strategy = strategy, "Document-kind radio selected");
                return Ok(true);
            }
        }

        debug!(kind = %kind, "No radio control found by any strategy");
        Ok(false)
    }

    async fn fill_document(&mut self, digits: &str) -> Result<FillOutcome, BrowserError> {
        // Step 1: locate the input and stamp the marker on it. Anchor
        // strategies, strongest first: the element that mentions both
        // labels, then a CPF label, then anything mentioning CPF at all.
        // From the anchor we take the first enabled text/tel input that
        // follows it in document order.
        let locate_js = format!(
            r#"(function() {{
                {prelude}
                const anchorTests = [
                    (el) => {{
                        const t = (el.innerText || '');
                        return t.includes('CPF') && t.includes('CNPJ');
                    }},
                    (el) => el.tagName === 'LABEL' && (el.innerText || '').includes('CPF'),
                    (el) => (el.innerText || '').includes('CPF'),
                ];
                for (const test of anchorTests) {{
                    for (const doc of allDocs()) {{
                        const inputs = Array.from(doc.querySelectorAll('input'))
                            .filter(i => (!i.type || i.type === 'text' || i.type === 'tel')
                                && !i.disabled && isVisible(i));
                        if (inputs.length === 0) continue;
                        const anchors = Array.from(doc.querySelectorAll('body *')).filter(test);
                        for (const anchor of anchors) {{
                            const after = inputs.find(i =>
                                anchor.compareDocumentPosition(i)
                                    & Node.DOCUMENT_POSITION_FOLLOWING);
                            if (after) {{
                                after.setAttribute('{mark}', '1');
                                after.focus();
                                after.value = '';
                                return true;
                            }}
                        }}
                    }}
                }}
                return false;
            }})()"#,
            prelude = ALL_DOCS_JS,
            mark = INPUT_MARK,
        );

        if !self.eval::<bool>(&locate_js).await? {
            return Ok(FillOutcome::FieldNotFound);
        }

        // Step 2: type one digit at a time with a human-ish pause. The
        // site's input mask rewrites the field on every input event and
        // loses characters that arrive in a single burst.
        for digit in digits.chars() {
            let type_js = format!(
                r#"(function() {{
                    {prelude}
                    for (const doc of allDocs()) {{
                        const el = doc.querySelector('[{mark}]');
                        if (el) {{
                            el.value = el.value + '{digit}';
                            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                            return true;
                        }}
                    }}
                    return false;
                }})()"#,
                prelude = ALL_DOCS_JS,
                mark = INPUT_MARK,
                digit = digit,
            );
            if !self.eval::<bool>(&type_js).await? {
                // The input vanished mid-typing (a re-render ate it).
                return Ok(FillOutcome::FieldNotFound);
            }
            tokio::time::sleep(self.tuning.type_delay).await;
        }

        // Step 3: fire change and read the field back. An empty read-back
        // means the mask swallowed everything we typed.
        let verify_js = format!(
            r#"(function() {{
                {prelude}
                for (const doc of allDocs()) {{
                    const el = doc.querySelector('[{mark}]');
                    if (el) {{
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return el.value.trim();
                    }}
                }}
                return '';
            }})()"#,
            prelude = ALL_DOCS_JS,
            mark = INPUT_MARK,
        );

        if self.eval::<String>(&verify_js).await?.is_empty() {
            return Ok(FillOutcome::StayedEmpty);
        }
        Ok(FillOutcome::Filled)
    }

    async fn submit_search(&mut self) -> Result<bool, BrowserError> {
        // Prefer a button in the same document as the marked input, then
        // anywhere. PESQUISAR is how the site has always spelled it, but
        // we match case-insensitively out of earned distrust.
        let js = format!(
            r#"(function() {{
                {prelude}
                const isSearchButton = (el) => {{
                    const text = ((el.innerText || '') + ' ' + (el.value || '')).toLowerCase();
                    return text.includes('pesquisar');
                }};
                const candidates = (doc) => Array.from(
                    doc.querySelectorAll("button, input[type='submit'], input[type='button'], a")
                ).filter(el => isSearchButton(el) && isVisible(el));

                const docs = allDocs();
                const withInput = docs.filter(d => d.querySelector('[{mark}]'));
                for (const doc of withInput.concat(docs)) {{
                    const btn = candidates(doc)[0];
                    if (btn) {{ btn.click(); return true; }}
                }}
                return false;
            }})()"#,
            prelude = ALL_DOCS_JS,
            mark = INPUT_MARK,
        );

        self.eval::<bool>(&js).await
    }

    async fn await_results(&mut self) -> Result<(), BrowserError> {
        // The site shows one of several blocking overlays while it thinks.
        // Wait for one to appear, then for it to clear; if none ever shows,
        // fall back to the flat grace delay and hope the page is done.
        let spinner_js = format!(
            r#"(function() {{
                {prelude}
                const sel = ".ui-widget-overlay, .ui-blockui, .ui-progressbar, [class*='loading' i], [class*='spinner' i]";
                for (const doc of allDocs()) {{
                    for (const el of doc.querySelectorAll(sel)) {{
                        if (isVisible(el)) return true;
                    }}
                }}
                return false;
            }})()"#,
            prelude = ALL_DOCS_JS,
        );

        let poll = Duration::from_millis(250);

        // Phase 1: did a spinner show up at all?
        let mut appeared = false;
        let visible_deadline = tokio::time::Instant::now() + self.tuning.spinner_visible;
        while tokio::time::Instant::now() < visible_deadline {
            if self.eval::<bool>(&spinner_js).await? {
                appeared = true;
                break;
            }
            tokio::time::sleep(poll).await;
        }

        if !appeared {
            debug!("No loading indicator appeared — falling back to grace delay");
            tokio::time::sleep(self.tuning.grace_delay).await;
            return Ok(());
        }

        // Phase 2: wait for it to go away. If it outlives the budget we
        // proceed anyway; the results either rendered or they didn't, and
        // the enumeration step will tell us which.
        let hidden_deadline = tokio::time::Instant::now() + self.tuning.spinner_hidden;
        while tokio::time::Instant::now() < hidden_deadline {
            if !self.eval::<bool>(&spinner_js).await? {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
        debug!("Loading indicator never cleared — proceeding with whatever rendered");
        Ok(())
    }

    async fn case_anchor_texts(&mut self) -> Result<Vec<String>, BrowserError> {
        let js = format!(
            r#"(function() {{
                {prelude}
                const cnj = /\d{{7}}-\d{{2}}\.\d{{4}}\.\d\.\d{{2}}\.\d{{4}}/;
                const texts = [];
                for (const doc of allDocs()) {{
                    for (const a of doc.querySelectorAll('a')) {{
                        const t = (a.innerText || '').trim();
                        if (t && cnj.test(t)) texts.push(t);
                    }}
                }}
                return texts;
            }})()"#,
            prelude = ALL_DOCS_JS,
        );
        self.eval::<Vec<String>>(&js).await
    }

    async fn page_text(&mut self) -> Result<String, BrowserError> {
        let js = format!(
            r#"(function() {{
                {prelude}
                return allDocs()
                    .map(d => d.body ? d.body.innerText : '')
                    .join('\n');
            }})()"#,
            prelude = ALL_DOCS_JS,
        );
        self.eval::<String>(&js).await
    }

    async fn open_case(
        &mut self,
        numero: &str,
    ) -> Result<Option<Box<dyn CaseView>>, BrowserError> {
        // Primary click: the anchor whose text carries the case number.
        let click_anchor_js = format!(
            r#"(function() {{
                {prelude}
                const numero = '{numero}';
                for (const doc of allDocs()) {{
                    for (const a of doc.querySelectorAll('a')) {{
                        if ((a.innerText || '').includes(numero)) {{ a.click(); return true; }}
                    }}
                }}
                return false;
            }})()"#,
            prelude = ALL_DOCS_JS,
            numero = js_str(numero),
        );

        let before = self.target_ids().await?;
        if !self.eval::<bool>(&click_anchor_js).await? {
            return Ok(None);
        }
        if let Some(popup) = self.wait_for_new_page(&before).await? {
            return Ok(Some(self.wrap_popup(popup).await));
        }

        // Fallback click: the first anchor in the case's table row (the
        // site sometimes puts the popup trigger on a sibling icon link).
        debug!(numero = numero, "Primary click opened nothing — trying the row's first anchor");
        let click_sibling_js = format!(
            r#"(function() {{
                {prelude}
                const numero = '{numero}';
                for (const doc of allDocs()) {{
                    for (const a of doc.querySelectorAll('a')) {{
                        if ((a.innerText || '').includes(numero)) {{
                            const row = a.closest('tr, div');
                            const first = row ? row.querySelector('a') : null;
                            if (first && first !== a) {{ first.click(); return true; }}
                            return false;
                        }}
                    }}
                }}
                return false;
            }})()"#,
            prelude = ALL_DOCS_JS,
            numero = js_str(numero),
        );

        let before = self.target_ids().await?;
        if !self.eval::<bool>(&click_sibling_js).await? {
            return Ok(None);
        }
        match self.wait_for_new_page(&before).await? {
            Some(popup) => Ok(Some(self.wrap_popup(popup).await)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(mut browser) = self.browser.take() {
            // Best-effort: a close error must not shadow whatever outcome
            // the lookup is already carrying.
            if let Err(e) = browser.close().await {
                warn!("Browser close error (non-fatal): {}", e);
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl CdpSession {
    async fn wrap_popup(&self, popup: Page) -> Box<dyn CaseView> {
        tokio::time::sleep(self.tuning.popup_settle).await;
        Box::new(CdpCaseView { page: Some(popup) })
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        // close() is the real teardown; this is the backstop for a session
        // dropped without one (a code path that should not exist — log it).
        if self.browser.is_some() {
            warn!("CdpSession dropped without close() — browser process may linger until exit");
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

struct CdpCaseView {
    page: Option<Page>,
}

impl CdpCaseView {
    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, BrowserError> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("case view already closed".into()))?;
        let result = page
            .evaluate(js.to_string())
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Protocol(format!("evaluate result: {}", e)))
    }
}

#[async_trait]
impl CaseView for CdpCaseView {
    async fn activate_movements_tab(&mut self) {
        let js = r#"(function() {
            const clickable = document.querySelectorAll(
                "[role='tab'], [role='button'], [role='link'], a, td, span, li");
            for (const el of clickable) {
                const t = (el.innerText || '').trim();
                if (/movimenta/i.test(t) && t.length < 60) { el.click(); return true; }
            }
            return false;
        })()"#;

        match self.eval::<bool>(js).await {
            Ok(true) => {
                // Give the tab's content a beat to render.
                tokio::time::sleep(Duration::from_millis(800)).await;
            }
            Ok(false) => debug!("No movements tab found — assuming inline rendering"),
            Err(e) => debug!("Movements tab click failed (non-fatal): {}", e),
        }
    }

    async fn visible_text(&mut self) -> Result<String, BrowserError> {
        self.eval::<String>("document.body ? document.body.innerText : ''")
            .await
    }

    async fn movement_row_sets(&mut self) -> Result<Vec<Vec<String>>, BrowserError> {
        // One strategy per container flavor the site has shipped: tables
        // and lists whose id or class names the movements. Row texts come
        // back raw, capped per set; the extraction layer filters.
        let js = format!(
            r#"(function() {{
                const strategies = [
                    "[id*='moviment' i] tr",
                    "[class*='moviment' i] tr",
                    "[id*='moviment' i] li",
                    "[class*='moviment' i] li",
                ];
                return strategies.map(sel => {{
                    const rows = [];
                    for (const el of document.querySelectorAll(sel)) {{
                        if (rows.length >= {cap}) break;
                        const t = (el.innerText || '').trim();
                        if (t) rows.push(t);
                    }}
                    return rows;
                }});
            }})()"#,
            cap = crate::extract::MOVEMENT_ROW_CAP,
        );
        self.eval::<Vec<Vec<String>>>(&js).await
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Popup close error (non-fatal): {}", e);
            }
        }
        Ok(())
    }
}

/// A scripted stand-in for the real browser, shared by the HTTP-layer
/// tests. It answers instantly, which is the least realistic thing any
/// component of this engine has ever done.
#[cfg(test)]
pub mod testing {
    use super::*;
    use portable_atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct StubBrowser {
        /// Anchor texts the results page will show.
        pub anchors: Vec<String>,
        /// Visible text of every detail popup.
        pub detail_text: String,
        /// Visible page text (banner hunting ground when anchors are empty).
        pub page_text: String,
        /// When true, the first session's navigate hangs until cancelled.
        pub hang_first_navigate: bool,
        /// Internal latch for hang_first_navigate; leave defaulted.
        pub hung_already: AtomicBool,
    }

    #[async_trait]
    impl CourtBrowser for StubBrowser {
        async fn open_session(&self) -> Result<Box<dyn CourtSession>, BrowserError> {
            let hang = self.hang_first_navigate
                && !self.hung_already.swap(true, Ordering::SeqCst);
            Ok(Box::new(StubSession {
                anchors: self.anchors.clone(),
                detail_text: self.detail_text.clone(),
                page_text: self.page_text.clone(),
                hang,
            }))
        }
    }

    struct StubSession {
        anchors: Vec<String>,
        detail_text: String,
        page_text: String,
        hang: bool,
    }

    #[async_trait]
    impl CourtSession for StubSession {
        async fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn select_document_kind(&mut self, _kind: DocKind) -> Result<bool, BrowserError> {
            Ok(true)
        }

        async fn fill_document(&mut self, _digits: &str) -> Result<FillOutcome, BrowserError> {
            Ok(FillOutcome::Filled)
        }

        async fn submit_search(&mut self) -> Result<bool, BrowserError> {
            Ok(true)
        }

        async fn await_results(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn case_anchor_texts(&mut self) -> Result<Vec<String>, BrowserError> {
            Ok(self.anchors.clone())
        }

        async fn page_text(&mut self) -> Result<String, BrowserError> {
            Ok(self.page_text.clone())
        }

        async fn open_case(
            &mut self,
            _numero: &str,
        ) -> Result<Option<Box<dyn CaseView>>, BrowserError> {
            Ok(Some(Box::new(StubCaseView {
                detail_text: self.detail_text.clone(),
            })))
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    struct StubCaseView {
        detail_text: String,
    }

    #[async_trait]
    impl CaseView for StubCaseView {
        async fn activate_movements_tab(&mut self) {}

        async fn visible_text(&mut self) -> Result<String, BrowserError> {
            Ok(self.detail_text.clone())
        }

        async fn movement_row_sets(&mut self) -> Result<Vec<Vec<String>>, BrowserError> {
            Ok(Vec::new())
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_defaults_match_site_timings() {
        let tuning = BrowserTuning::default();
        assert_eq!(tuning.spinner_visible, Duration::from_secs(2));
        assert_eq!(tuning.spinner_hidden, Duration::from_secs(25));
        assert_eq!(tuning.grace_delay, Duration::from_secs(8));
        assert_eq!(tuning.popup_timeout, Duration::from_secs(20));
        assert!(tuning.chrome_path.is_none());
    }

    #[test]
    fn test_js_str_escapes_quotes_and_backslashes() {
        assert_eq!(js_str("it's"), "it\\'s");
        assert_eq!(js_str("a\\b"), "a\\\\b");
        assert_eq!(js_str("1234567-89.2021.8.13.0024"), "1234567-89.2021.8.13.0024");
    }

    #[test]
    fn test_radio_strategy_order_is_label_first() {
        // The strategy list IS the configuration surface for the radio
        // ambiguity; the order matters and is asserted so a reorder is a
        // conscious act.
        assert_eq!(RADIO_STRATEGIES, &["label-text", "attribute", "ordinal"]);
    }
}
