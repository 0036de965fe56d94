//! Periodic best-effort scan of the rendered view tree for known layout failures.
//!
//! The view tree is reached through the `ViewProbe` capability trait; hosts
//! without a rendered view simply never construct a `Scanner`.
use crate::capture::CaptureSink;
use crate::entry::Severity;
use crate::error::Result;
use crate::normalizer::{Arg, Capture};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Heights at or below this many pixels count as collapsed.
pub const DEFAULT_COLLAPSE_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    #[default]
    Block,
    Flex,
    Grid,
    Inline,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Auto,
    Scroll,
}

impl Overflow {
    pub fn is_scrollable(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

/// A read-only snapshot of one rendered element and its layout metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    /// How the host identifies the element (selector, id, widget path).
    pub reference: String,
    pub display: Display,
    pub overflow_x: Overflow,
    pub overflow_y: Overflow,
    pub width: f64,
    pub height: f64,
    pub client_width: f64,
    pub client_height: f64,
    pub scroll_width: f64,
    pub scroll_height: f64,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: ViewNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Capability interface over the host's rendered view tree.
pub trait ViewProbe: Send + Sync {
    /// Returns the current root of the view tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read right now.
    fn snapshot(&self) -> Result<ViewNode>;
}

/// A layout problem found by a heuristic.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    /// Name of the heuristic that produced it.
    pub heuristic: &'static str,
    /// The offending element.
    pub reference: String,
    /// Human-readable explanation, used as the entry message.
    pub description: String,
    pub measurements: serde_json::Value,
}

/// One layout rule applied to every node of the tree.
pub trait LayoutHeuristic: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks `node` in the context of its `parent` (`None` for the root).
    fn inspect(&self, node: &ViewNode, parent: Option<&ViewNode>) -> Option<Finding>;
}

/// A scrollable container whose content overflows while its own height
/// collapsed to (near) zero inside a flex parent. Usually a missing
/// `min-height: 0` or `flex: 1`.
pub struct CollapsedScrollContainer {
    pub threshold: f64,
}

impl LayoutHeuristic for CollapsedScrollContainer {
    fn name(&self) -> &'static str {
        "collapsed-scroll-container"
    }

    fn inspect(&self, node: &ViewNode, parent: Option<&ViewNode>) -> Option<Finding> {
        let parent = parent?;
        if parent.display != Display::Flex || !node.overflow_y.is_scrollable() {
            return None;
        }
        if node.scroll_height <= node.client_height || node.height > self.threshold {
            return None;
        }
        Some(Finding {
            heuristic: self.name(),
            reference: node.reference.clone(),
            description: format!(
                "Scroll container {} collapsed to {}px inside flex parent {} while its content is {}px tall",
                node.reference, node.height, parent.reference, node.scroll_height
            ),
            measurements: json!({
                "height": node.height,
                "client_height": node.client_height,
                "scroll_height": node.scroll_height,
                "parent": parent.reference,
                "parent_height": parent.height,
            }),
        })
    }
}

/// A flex child with overflowing content whose width collapsed to (near) zero.
pub struct ZeroWidthFlexChild {
    pub threshold: f64,
}

impl LayoutHeuristic for ZeroWidthFlexChild {
    fn name(&self) -> &'static str {
        "zero-width-flex-child"
    }

    fn inspect(&self, node: &ViewNode, parent: Option<&ViewNode>) -> Option<Finding> {
        let parent = parent?;
        if parent.display != Display::Flex || node.display == Display::None {
            return None;
        }
        if node.scroll_width <= node.client_width || node.width > self.threshold {
            return None;
        }
        Some(Finding {
            heuristic: self.name(),
            reference: node.reference.clone(),
            description: format!(
                "Flex child {} collapsed to {}px wide while its content is {}px wide",
                node.reference, node.width, node.scroll_width
            ),
            measurements: json!({
                "width": node.width,
                "client_width": node.client_width,
                "scroll_width": node.scroll_width,
                "parent": parent.reference,
                "parent_width": parent.width,
            }),
        })
    }
}

/// The built-in heuristic catalog.
pub fn default_heuristics(threshold: f64) -> Vec<Box<dyn LayoutHeuristic>> {
    vec![
        Box::new(CollapsedScrollContainer { threshold }),
        Box::new(ZeroWidthFlexChild { threshold }),
    ]
}

/// Applies the heuristic catalog to a probe and records findings as warnings.
pub struct Scanner {
    probe: Arc<dyn ViewProbe>,
    heuristics: Vec<Box<dyn LayoutHeuristic>>,
    sink: CaptureSink,
    /// Findings reported on a previous pass and still present.
    active: Mutex<HashSet<(&'static str, String)>>,
}

impl Scanner {
    /// Creates a scanner running the built-in heuristics at the default threshold.
    pub fn new(probe: Arc<dyn ViewProbe>, sink: CaptureSink) -> Self {
        Self::with_heuristics(probe, sink, default_heuristics(DEFAULT_COLLAPSE_THRESHOLD))
    }

    /// Creates a scanner running `heuristics` in order.
    ///
    /// # Arguments
    ///
    /// * `probe` - Source of the view tree, read once per pass.
    /// * `sink` - Where findings are recorded as warnings.
    /// * `heuristics` - The rules applied to every node.
    pub fn with_heuristics(
        probe: Arc<dyn ViewProbe>,
        sink: CaptureSink,
        heuristics: Vec<Box<dyn LayoutHeuristic>>,
    ) -> Self {
        Self {
            probe,
            heuristics,
            sink,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Runs one pass and returns the number of entries emitted.
    ///
    /// A problem is reported once when first detected and again only after
    /// it has disappeared and come back. Probe errors and heuristic panics
    /// end the pass silently.
    pub fn scan_once(&self) -> usize {
        let findings = match catch_unwind(AssertUnwindSafe(|| self.collect())) {
            Ok(Ok(findings)) => findings,
            _ => return 0,
        };

        let Ok(mut active) = self.active.lock() else {
            return 0;
        };
        // Only findings that were actually recorded count as reported; a
        // dropped capture is retried on the next pass.
        let mut reported: HashSet<(&'static str, String)> = HashSet::new();
        let mut emitted = 0;
        for finding in findings {
            let key = (finding.heuristic, finding.reference.clone());
            if active.contains(&key) {
                reported.insert(key);
                continue;
            }
            let capture = Capture::new(
                Severity::Warn,
                vec![Arg::Text(finding.description), Arg::Json(finding.measurements)],
            )
            .with_field("heuristic", finding.heuristic)
            .with_field("element", finding.reference);
            if self.sink.capture(capture).is_some() {
                reported.insert(key);
                emitted += 1;
            }
        }
        *active = reported;
        emitted
    }

    fn collect(&self) -> Result<Vec<Finding>> {
        let root = self.probe.snapshot()?;
        let mut findings = Vec::new();
        self.walk(&root, None, &mut findings);
        Ok(findings)
    }

    fn walk(&self, node: &ViewNode, parent: Option<&ViewNode>, findings: &mut Vec<Finding>) {
        for heuristic in &self.heuristics {
            if let Some(finding) = heuristic.inspect(node, parent) {
                findings.push(finding);
            }
        }
        for child in &node.children {
            self.walk(child, Some(node), findings);
        }
    }

    /// Starts the periodic scan on the current tokio runtime.
    ///
    /// The first pass runs after `warmup`, then every `interval`.
    pub fn spawn(self: Arc<Self>, warmup: Duration, interval: Duration) -> ScannerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(warmup).await;
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                self.scan_once();
            }
        });
        ScannerHandle { task }
    }
}

/// Handle to a running scanner task.
pub struct ScannerHandle {
    task: JoinHandle<()>,
}

impl ScannerHandle {
    /// Cancels the scan task. Safe to call more than once.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A probe over a tree the host updates by hand.
#[derive(Default)]
pub struct StaticProbe {
    root: Mutex<ViewNode>,
}

impl StaticProbe {
    /// Starts with `root` as the whole tree.
    pub fn new(root: ViewNode) -> Self {
        Self {
            root: Mutex::new(root),
        }
    }

    /// Swaps in a new tree for subsequent passes.
    pub fn replace(&self, root: ViewNode) {
        if let Ok(mut current) = self.root.lock() {
            *current = root;
        }
    }
}

impl ViewProbe for StaticProbe {
    fn snapshot(&self) -> Result<ViewNode> {
        self.root
            .lock()
            .map(|root| root.clone())
            .map_err(|_| crate::error::CoreError::Scan("view tree lock poisoned".into()))
    }
}
