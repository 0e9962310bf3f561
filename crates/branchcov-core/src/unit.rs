//! Compilation units.
//!
//! A [`CoveredCode`] owns one source input through its whole life:
//! parse, instrument, execute and analyse. Instrumentation happens lazily on
//! first access and is memoized; execution happens at most once.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    analyser::{Analyser, NodeAnalyser},
    ast::SyntaxTree,
    buffer::Buffer,
    parser::{RubyParser, SourceParser},
    registry::{CounterArray, CounterRegistry, UnitId},
    rewriter,
    tracker::{TrackerAllocator, TrackerId},
    CoverConfig, CoverError, Result,
};

/// Everything an execution facility needs to run one unit
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub source: &'a str,
    pub unit: UnitId,
    pub name: &'a str,
    /// Line number of the first source line
    pub lineno: usize,
    pub registry: &'a Arc<CounterRegistry>,
    pub config: &'a CoverConfig,
}

/// Runs instrumented code. Counter increments baked into the source must
/// land in `request.registry` under `request.unit`.
pub trait Executor {
    fn execute(&mut self, request: ExecutionRequest<'_>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitState {
    Created,
    Instrumented,
    Executed,
}

/// Serializable coverage summary for one executed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub name: String,
    pub unit: UnitId,
    pub tracker_count: usize,
    pub hits: Vec<u64>,
    pub line_coverage: Vec<Option<u64>>,
    pub branch_coverage: Vec<String>,
}

struct Instrumentation {
    tree: Option<SyntaxTree>,
    tracker_count: usize,
    source: String,
}

/// One source input under coverage
pub struct CoveredCode {
    id: UnitId,
    name: String,
    buffer: Buffer,
    config: CoverConfig,
    registry: Arc<CounterRegistry>,
    parser: Box<dyn SourceParser>,
    instrumentation: Option<Instrumentation>,
    counters: Option<Arc<CounterArray>>,
    executed: bool,
}

impl std::fmt::Debug for CoveredCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoveredCode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parser", &self.parser.name())
            .field("state", &self.state())
            .finish()
    }
}

impl CoveredCode {
    pub fn builder() -> CoveredCodeBuilder {
        CoveredCodeBuilder::default()
    }

    /// Unit from literal text with default settings
    pub fn from_source(source: impl Into<String>) -> Result<Self> {
        Self::builder().source(source).build()
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn registry(&self) -> &Arc<CounterRegistry> {
        &self.registry
    }

    pub fn state(&self) -> UnitState {
        if self.executed {
            UnitState::Executed
        } else if self.instrumentation.is_some() {
            UnitState::Instrumented
        } else {
            UnitState::Created
        }
    }

    fn instrument(&mut self) -> Result<&Instrumentation> {
        let instrumentation = match self.instrumentation.take() {
            Some(instrumentation) => instrumentation,
            None => self.build_instrumentation()?,
        };
        Ok(self.instrumentation.insert(instrumentation))
    }

    fn build_instrumentation(&mut self) -> Result<Instrumentation> {
        let Some(raw) = self.parser.parse(&self.buffer)? else {
            warn!("Unit {} ({}) produced no tree, nothing to instrument", self.id, self.name);
            return Ok(Instrumentation {
                tree: None,
                tracker_count: 0,
                source: String::new(),
            });
        };

        let mut allocator = TrackerAllocator::new();
        let tree = SyntaxTree::build(
            &raw,
            self.buffer.source(),
            self.id,
            &self.config,
            &mut allocator,
        )?;
        let source = rewriter::instrument(&tree, self.buffer.source());
        debug!(
            "Instrumented unit {} ({}): {} trackers, {} -> {} bytes",
            self.id,
            self.name,
            allocator.count(),
            self.buffer.source().len(),
            source.len()
        );
        Ok(Instrumentation {
            tree: Some(tree),
            tracker_count: allocator.count(),
            source,
        })
    }

    /// Rewritten source; empty when the input produced no tree
    pub fn instrumented_source(&mut self) -> Result<&str> {
        Ok(&self.instrument()?.source)
    }

    pub fn tree(&mut self) -> Result<Option<&SyntaxTree>> {
        Ok(self.instrument()?.tree.as_ref())
    }

    pub fn tracker_count(&mut self) -> Result<usize> {
        Ok(self.instrument()?.tracker_count)
    }

    /// Increment text inserted for a tracker
    pub fn tracker_source(&mut self, tracker: TrackerId) -> Result<String> {
        let instrumentation = self.instrument()?;
        let count = instrumentation.tracker_count;
        match &instrumentation.tree {
            Some(tree) if tracker < count => Ok(tree.tracker_source(tracker)),
            _ => Err(CoverError::TrackerOutOfRange { tracker, count }),
        }
    }

    /// Register a fresh counter array and run the instrumented source.
    ///
    /// A second call is a no-op. An executor failure leaves the unit
    /// executed with whatever counters were recorded.
    pub fn execute(&mut self, executor: &mut dyn Executor) -> Result<()> {
        if self.executed {
            debug!("Unit {} already executed, skipping", self.id);
            return Ok(());
        }
        let tracker_count = self.tracker_count()?;
        self.counters = Some(self.registry.add(self.id, tracker_count));
        self.executed = true;

        info!("Executing unit {} ({})", self.id, self.name);
        let request = ExecutionRequest {
            source: match &self.instrumentation {
                Some(instrumentation) => &instrumentation.source,
                None => "",
            },
            unit: self.id,
            name: &self.name,
            lineno: self.buffer.first_line(),
            registry: &self.registry,
            config: &self.config,
        };
        executor.execute(request).map_err(CoverError::Execution)
    }

    fn counters(&self) -> Result<&CounterArray> {
        match &self.counters {
            Some(counters) if self.executed => Ok(counters),
            _ => Err(CoverError::NotExecuted),
        }
    }

    /// Hits recorded by one tracker
    pub fn tracker_hits(&self, tracker: TrackerId) -> Result<u64> {
        let counters = self.counters()?;
        counters.get(tracker).ok_or(CoverError::TrackerOutOfRange {
            tracker,
            count: counters.len(),
        })
    }

    /// Snapshot of every tracker's hits
    pub fn cover(&self) -> Result<Vec<u64>> {
        Ok(self.counters()?.snapshot())
    }

    /// Run an analyser over this unit's tree and counters
    pub fn analyse<A: Analyser>(&self, analyser: &A) -> Result<A::Output> {
        let hits = self.cover()?;
        match self.executed_tree() {
            Some(tree) => {
                debug!("Running {} analyser on unit {}", analyser.name(), self.id);
                Ok(analyser.analyse(tree, &hits))
            }
            None => Ok(A::Output::default()),
        }
    }

    fn executed_tree(&self) -> Option<&SyntaxTree> {
        self.instrumentation.as_ref()?.tree.as_ref()
    }

    /// Highest entry count of any node lying within each source line
    pub fn line_coverage(&self) -> Result<Vec<Option<u64>>> {
        let runs = self.analyse(&NodeAnalyser)?;
        let Some(tree) = self.executed_tree() else {
            return Ok(Vec::new());
        };

        let mut lines = vec![None; self.buffer.line_count()];
        for node in tree.nodes() {
            let range = node.range();
            let first = self.buffer.line_for_position(range.start);
            let last = self.buffer.line_for_position(range.end.max(range.start + 1) - 1);
            if first != last {
                continue;
            }
            let Some(line) = lines.get_mut(first) else {
                continue;
            };
            let count = runs.get(&node.id()).copied().unwrap_or(0);
            *line = Some(line.map_or(count, |seen: u64| seen.max(count)));
        }
        Ok(lines)
    }

    /// One string per source line: `'x'` marks unreached executable code,
    /// `'-'` unreached inert code, and a space anything else
    pub fn branch_coverage(&self) -> Result<Vec<String>> {
        let runs = self.analyse(&NodeAnalyser)?;
        let Some(tree) = self.executed_tree() else {
            return Ok(Vec::new());
        };

        let source = self.buffer.source();
        let mut image: Vec<Vec<char>> = self
            .buffer
            .source_lines()
            .iter()
            .map(|line| vec![' '; line.chars().count()])
            .collect();

        for node in tree.nodes() {
            if runs.get(&node.id()).copied().unwrap_or(0) > 0 {
                continue;
            }
            let mark = if tree.is_executable(node.id()) { 'x' } else { '-' };
            let range = node.range();
            let Some(text) = source.get(range.clone()) else {
                continue;
            };
            let children: Vec<_> = tree.children(node.id()).map(|c| tree.node(c).range()).collect();

            for (index, ch) in text.char_indices() {
                let offset = range.start + index;
                if ch.is_whitespace() || children.iter().any(|child| child.contains(&offset)) {
                    continue;
                }
                let line = self.buffer.line_for_position(offset);
                let column = self.buffer.column_for_position(offset);
                if let Some(cell) = image.get_mut(line).and_then(|row| row.get_mut(column)) {
                    *cell = mark;
                }
            }
        }

        Ok(image.into_iter().map(|row| row.into_iter().collect()).collect())
    }

    /// Serializable summary of the executed unit
    pub fn report(&self) -> Result<CoverageReport> {
        let hits = self.cover()?;
        Ok(CoverageReport {
            name: self.name.clone(),
            unit: self.id,
            tracker_count: hits.len(),
            line_coverage: self.line_coverage()?,
            branch_coverage: self.branch_coverage()?,
            hits,
        })
    }

    /// Drop this unit's counters from the registry. Queries keep working on
    /// the counters the unit already holds.
    pub fn purge(&self) -> Option<Arc<CounterArray>> {
        self.registry.remove(self.id)
    }
}

/// Builder for [`CoveredCode`]; exactly one of `path` or `source` is required
#[derive(Default)]
pub struct CoveredCodeBuilder {
    path: Option<PathBuf>,
    source: Option<String>,
    lineno: Option<usize>,
    name: Option<String>,
    config: Option<CoverConfig>,
    registry: Option<Arc<CounterRegistry>>,
    parser: Option<Box<dyn SourceParser>>,
}

impl CoveredCodeBuilder {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Line number of the first line, for fragments of larger files
    pub fn lineno(mut self, lineno: usize) -> Self {
        self.lineno = Some(lineno);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: CoverConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Counter registry to register into; defaults to the process-wide one
    pub fn registry(mut self, registry: Arc<CounterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn parser(mut self, parser: Box<dyn SourceParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn build(self) -> Result<CoveredCode> {
        let config = self.config.unwrap_or_default();
        let buffer = match (self.path, self.source) {
            (Some(_), Some(_)) => {
                return Err(CoverError::InvalidUnitInput {
                    reason: "both a path and source text were given",
                })
            }
            (None, None) => {
                return Err(CoverError::InvalidUnitInput {
                    reason: "either a path or source text is required",
                })
            }
            (Some(path), None) => Buffer::read(path)?,
            (None, Some(source)) => Buffer::new(config.default_name.clone(), source),
        };
        let buffer = buffer.with_first_line(self.lineno.unwrap_or(1));
        let name = self.name.unwrap_or_else(|| buffer.name().to_string());
        let parser = match self.parser {
            Some(parser) => parser,
            None => Box::new(RubyParser::new()?),
        };

        let id = UnitId::next();
        debug!("Created unit {} ({})", id, name);
        Ok(CoveredCode {
            id,
            name,
            buffer,
            config,
            registry: self.registry.unwrap_or_else(CounterRegistry::global),
            parser,
            instrumentation: None,
            counters: None,
            executed: false,
        })
    }
}
