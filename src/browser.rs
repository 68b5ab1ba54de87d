//! Page interaction layer for the DBD DataWarehouse.
//!
//! Everything the pipeline knows about the remote site lives behind the
//! [`RegistrySession`] trait: search result pages, pagination, profile
//! redirects, and the rendered financial tables. [`ChromeSession`] is the
//! production implementation on top of headless Chrome; tests drive the
//! pipeline with scripted implementations instead.
//!
//! Each worker owns exactly one session. Sessions are never shared between
//! workers; a lost session is reported as [`InteractionError::SessionLost`]
//! so the worker can relaunch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// Registry base URL.
pub const BASE_URL: &str = "https://datawarehouse.dbd.go.th";

/// Profile URL prefixes tried in order when opening a company page. The
/// registry keys profiles by juristic type digit; 3 covers partnerships.
const PROFILE_PREFIXES: &[&str] = &["5", "7", "6", "3", ""];

static REG_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(0\d{12})").unwrap());
static PROFILE_REG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"เลขทะเบียนนิติบุคคล\s*[:\s]\s*(0\d{12})").unwrap());
static PROFILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ชื่อนิติบุคคล\s*[:\s]\s*(.+)").unwrap());
static PAGE_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"หน้า\s*\d+\s*/?\s*(\d+)").unwrap());
static YEAR_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(25[6-7][0-9])$").unwrap());

/// Failure of the page-interaction primitive. Always retryable at the
/// company boundary; never conflated with "no results".
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),
}

/// One listing row in a search result page.
#[derive(Debug, Clone)]
pub struct Listing {
    pub registration_id: String,
    /// The raw display line, including row and registration numbers.
    pub display_line: String,
}

/// A search result page.
#[derive(Debug, Clone)]
pub struct ResultsView {
    pub total_pages: u32,
    pub listings: Vec<Listing>,
}

/// A company profile page the registry redirected to.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub registration_id: Option<String>,
    pub display_name: String,
}

/// Outcome of loading a search (or paginating within one).
#[derive(Debug, Clone)]
pub enum SearchView {
    /// The registry navigated straight to a company profile (single match).
    Redirected(ProfileView),
    Results(ResultsView),
    /// The registry reported no data for the term.
    Empty,
}

/// One row of a rendered statement table. `cells` holds every value cell in
/// document order; each fiscal year occupies two cells (value, %-change).
#[derive(Debug, Clone)]
pub struct FinancialRow {
    pub label: String,
    pub cells: Vec<String>,
}

/// A rendered statement table: fiscal years from the header plus data rows.
#[derive(Debug, Clone, Default)]
pub struct FinancialTable {
    pub years: Vec<u16>,
    pub rows: Vec<FinancialRow>,
}

/// The financial-data view of one company profile.
#[derive(Debug, Clone, Default)]
pub struct FinancialView {
    pub income_statement: Option<FinancialTable>,
    pub balance_sheet: Option<FinancialTable>,
}

impl FinancialView {
    pub fn is_empty(&self) -> bool {
        self.income_statement.is_none() && self.balance_sheet.is_none()
    }
}

/// The page-interaction capability the pipeline consumes.
pub trait RegistrySession {
    /// Load the search page for a term.
    fn search(&mut self, term: &str) -> Result<SearchView, InteractionError>;

    /// Navigate to a later result page of the current search. May observe a
    /// delayed redirect to a profile page.
    fn goto_results_page(&mut self, page: u32) -> Result<SearchView, InteractionError>;

    /// Open the financial-data view of a company profile and read the
    /// rendered tables. An entity without rendered tables yields an empty
    /// view, which is not an error.
    fn open_financials(
        &mut self,
        registration_id: &str,
        include_balance_sheet: bool,
    ) -> Result<FinancialView, InteractionError>;
}

/// Wait durations between page interactions, from the browser config section.
#[derive(Debug, Clone, Copy)]
pub struct BrowserWaits {
    pub page_load: Duration,
    pub tab_click: Duration,
    pub table_load: Duration,
    pub extra: Duration,
}

/// Production session on headless Chrome. One per worker, exclusively owned.
pub struct ChromeSession {
    // Keeps the Chrome process alive for the lifetime of the session.
    _browser: headless_chrome::Browser,
    tab: Arc<headless_chrome::Tab>,
    waits: BrowserWaits,
    artifact_dir: Option<PathBuf>,
}

impl ChromeSession {
    /// Launch a Chrome instance and open a tab. Sandbox is disabled inside
    /// containers (detected via /.dockerenv or DBDHARVEST_CONTAINER).
    /// Each instance gets its own debug port so parallel workers don't
    /// collide.
    pub fn launch(
        headless: bool,
        waits: BrowserWaits,
        artifact_dir: Option<PathBuf>,
    ) -> Result<Self, InteractionError> {
        let is_container = std::env::var("DBDHARVEST_CONTAINER").is_ok()
            || std::path::Path::new("/.dockerenv").exists();

        static PORT_COUNTER: std::sync::atomic::AtomicU16 =
            std::sync::atomic::AtomicU16::new(9222);
        let debug_port = PORT_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if debug_port > 9322 {
            PORT_COUNTER.store(9222, std::sync::atomic::Ordering::Relaxed);
        }

        let options = headless_chrome::LaunchOptions::default_builder()
            .headless(headless)
            .sandbox(!is_container)
            .port(Some(debug_port))
            .window_size(Some((1920, 1080)))
            .build()
            .map_err(|e| InteractionError::SessionLost(format!("launch options: {}", e)))?;

        let browser = headless_chrome::Browser::new(options)
            .map_err(|e| InteractionError::SessionLost(format!("launch failed: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| InteractionError::SessionLost(format!("tab creation failed: {}", e)))?;

        Ok(Self {
            _browser: browser,
            tab,
            waits,
            artifact_dir,
        })
    }

    fn navigate(&self, url: &str) -> Result<(), InteractionError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| InteractionError::Navigation(format!("{}: {}", url, e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| InteractionError::Timeout(format!("{}: {}", url, e)))?;
        std::thread::sleep(self.waits.page_load);
        Ok(())
    }

    fn body_text(&self) -> Result<String, InteractionError> {
        self.tab
            .find_element("body")
            .map_err(|e| InteractionError::ElementNotFound(format!("body: {}", e)))?
            .get_inner_text()
            .map_err(|e| InteractionError::SessionLost(format!("read body: {}", e)))
    }

    /// Dismiss the cookie-consent banner if present. Best effort.
    fn accept_cookies(&self) {
        for label in ["ยอมรับทั้งหมด", "ยอมรับ", "ปิด"] {
            let xpath = format!("//button[contains(text(), '{}')]", label);
            if let Ok(button) = self.tab.find_element_by_xpath(&xpath) {
                if button.click().is_ok() {
                    std::thread::sleep(Duration::from_secs(1));
                    return;
                }
            }
        }
    }

    /// Click the first visible element containing the given text.
    fn click_text(&self, text: &str) -> bool {
        let xpath = format!("//*[contains(text(), '{}')]", text);
        match self.tab.find_elements_by_xpath(&xpath) {
            Ok(elements) => elements.iter().any(|e| e.click().is_ok()),
            Err(_) => false,
        }
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn parse_profile(body: &str) -> ProfileView {
        let registration_id = PROFILE_REG
            .captures(body)
            .map(|caps| caps[1].to_string());
        let display_name = PROFILE_NAME
            .captures(body)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default();
        ProfileView {
            registration_id,
            display_name,
        }
    }

    fn parse_results(body: &str) -> ResultsView {
        let mut total_pages = 1;
        for line in body.lines() {
            if let Some(caps) = PAGE_COUNT.captures(line) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    total_pages = n.max(1);
                    break;
                }
            }
        }

        let listings = body
            .lines()
            .filter(|line| line.contains(crate::search_terms::LIMITED_SUFFIX))
            .filter_map(|line| {
                REG_NUMBER.captures(line).map(|caps| Listing {
                    registration_id: caps[1].to_string(),
                    display_line: line.trim().to_string(),
                })
            })
            .collect();

        ResultsView {
            total_pages,
            listings,
        }
    }

    fn classify_view(&self) -> Result<SearchView, InteractionError> {
        if self.current_url().contains("/company/profile/") {
            let body = self.body_text()?;
            return Ok(SearchView::Redirected(Self::parse_profile(&body)));
        }
        let body = self.body_text()?;
        if body.contains("ไม่พบข้อมูล") {
            return Ok(SearchView::Empty);
        }
        Ok(SearchView::Results(Self::parse_results(&body)))
    }

    /// Read the statement table currently rendered on the page: the first
    /// table whose header row carries Buddhist-era years.
    fn read_statement_table(&self) -> Result<Option<FinancialTable>, InteractionError> {
        let tables = self
            .tab
            .find_elements("table")
            .map_err(|e| InteractionError::ElementNotFound(format!("table: {}", e)))?;

        for table in tables {
            let text = match table.get_inner_text() {
                Ok(t) => t,
                Err(_) => continue,
            };
            let mut lines = text.lines();
            let header = match lines.next() {
                Some(h) => h,
                None => continue,
            };

            let years: Vec<u16> = header
                .split_whitespace()
                .filter_map(|cell| {
                    YEAR_HEADER
                        .captures(cell)
                        .and_then(|caps| caps[1].parse().ok())
                })
                .collect();
            if years.is_empty() {
                continue;
            }

            // Rows render as tab-separated cells: label first, then value and
            // %-change cells alternating per year.
            let rows = lines
                .filter_map(|line| {
                    let mut cells = line.split('\t').map(|c| c.trim().to_string());
                    let label = cells.next()?;
                    if label.is_empty() {
                        return None;
                    }
                    Some(FinancialRow {
                        label,
                        cells: cells.collect(),
                    })
                })
                .collect();

            return Ok(Some(FinancialTable { years, rows }));
        }

        Ok(None)
    }

    /// Save a screenshot for debugging. Best effort; failures only warn.
    pub fn save_screenshot(&self, tag: &str) {
        let Some(dir) = &self.artifact_dir else {
            return;
        };
        use headless_chrome::protocol::cdp::Page;
        match self.tab.capture_screenshot(
            Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        ) {
            Ok(bytes) => {
                if std::fs::create_dir_all(dir).is_ok() {
                    let path = dir.join(format!("{}.png", tag));
                    if let Err(e) = std::fs::write(&path, bytes) {
                        warn!("Failed to write screenshot {}: {}", path.display(), e);
                    }
                }
            }
            Err(e) => warn!("Screenshot capture failed: {}", e),
        }
    }
}

impl RegistrySession for ChromeSession {
    fn search(&mut self, term: &str) -> Result<SearchView, InteractionError> {
        let url = format!("{}/juristic/searchInfo?keyword={}", BASE_URL, term);
        self.navigate(&url)?;
        self.accept_cookies();
        self.classify_view()
    }

    fn goto_results_page(&mut self, page: u32) -> Result<SearchView, InteractionError> {
        let input = self
            .tab
            .find_element("input[type=\"number\"]")
            .map_err(|e| InteractionError::ElementNotFound(format!("page input: {}", e)))?;
        input
            .click()
            .map_err(|e| InteractionError::ElementNotFound(format!("page input click: {}", e)))?;
        self.tab
            .type_str(&page.to_string())
            .map_err(|e| InteractionError::SessionLost(format!("type page number: {}", e)))?;
        self.tab
            .press_key("Enter")
            .map_err(|e| InteractionError::SessionLost(format!("submit page number: {}", e)))?;
        std::thread::sleep(Duration::from_secs(3));
        self.classify_view()
    }

    fn open_financials(
        &mut self,
        registration_id: &str,
        include_balance_sheet: bool,
    ) -> Result<FinancialView, InteractionError> {
        for prefix in PROFILE_PREFIXES {
            let url = format!("{}/company/profile/{}{}", BASE_URL, prefix, registration_id);
            if let Err(e) = self.navigate(&url) {
                debug!("Profile prefix '{}' failed for {}: {}", prefix, registration_id, e);
                continue;
            }
            self.accept_cookies();

            let body = self.body_text()?;
            if !body.contains("ชื่อนิติบุคคล") && !body.contains("ข้อมูลนิติบุคคล") {
                continue;
            }

            if !self.click_text("ข้อมูลงบการเงิน") {
                debug!("Financial tab not clickable for {}", registration_id);
                continue;
            }
            std::thread::sleep(self.waits.tab_click);

            let mut view = FinancialView::default();

            if self.click_text("งบกำไรขาดทุน") {
                std::thread::sleep(self.waits.table_load);
                std::thread::sleep(self.waits.extra);
                view.income_statement = self.read_statement_table()?;
            }

            if include_balance_sheet && self.click_text("งบแสดงฐานะการเงิน") {
                std::thread::sleep(self.waits.table_load);
                std::thread::sleep(self.waits.extra);
                view.balance_sheet = self.read_statement_table()?;
            }

            return Ok(view);
        }

        // No prefix produced a recognizable profile page.
        Ok(FinancialView::default())
    }
}
