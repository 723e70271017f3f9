//! Cache building and iteration
//!
//! A table without a complete cache gets one in-flight build, represented by
//! a [`PartialBuild`]: the partially filled cache plus the shared driver that
//! produces the next item. Every reader of the table keeps its own position
//! and pumps the shared driver when it runs out of produced items, so a second
//! reader sees what the first one already produced instead of restarting the
//! parent chain.
//!
//! A build is promoted to the complete cache only when its source is
//! exhausted. Readers that stop early (a `limit`) leave the build parked for
//! the next reader. `reset()` cancels the build's token and drops the partial
//! cache; the driver checks the token after every await and stops silently.

use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::cache::ItemCache;
use super::variants::{BuildSource, PendingItem};
use super::{TableId, TableSpec};
use crate::error::{OrigraphError, OrigraphResult};
use crate::item::{value_to_key, WrappedItem};
use crate::model::{ModelRef, ModelState, NetworkModel, WeakModel};

/// Cooperative cancellation flag shared between a table and its build
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Options for [`NetworkModel::iterate`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterateOptions {
    /// Reset the table (and its descendants) before iterating
    pub reset: bool,
    /// Stop after this many items; the build is left unfinished
    pub limit: Option<usize>,
}

impl IterateOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            reset: false,
            limit: Some(limit),
        }
    }

    pub fn with_reset() -> Self {
        Self {
            reset: true,
            limit: None,
        }
    }
}

/// Internal iteration step; `Interrupted` means the table was reset while
/// the iteration was in flight.
#[derive(Debug, Clone)]
pub(crate) enum Step<T> {
    Item(T),
    Interrupted,
}

/// The in-flight build of a table
pub(crate) struct PartialBuild {
    pub(crate) build_id: u64,
    pub(crate) token: CancellationToken,
    pub(crate) cache: ItemCache,
    /// Aggregate rows rejected while finishing, removed on promotion
    pub(crate) dropped: Vec<String>,
    driver: Arc<AsyncMutex<BuildDriver>>,
}

impl PartialBuild {
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

/// Produces items for one build of one table
pub(crate) struct BuildDriver {
    model: WeakModel,
    table_id: TableId,
    build_id: u64,
    token: CancellationToken,
    source: BuildSource,
    finished: bool,
}

impl BuildDriver {
    /// Advance the build until one item is admitted, the source is exhausted
    /// (and the cache promoted) or the build is cancelled. Effects are
    /// published through the table's partial cache, not returned.
    async fn step(&mut self) -> OrigraphResult<()> {
        while !self.finished {
            if self.token.is_cancelled() {
                self.finished = true;
                break;
            }
            let Some(model) = self.model.upgrade() else {
                self.finished = true;
                break;
            };
            match &mut self.source {
                BuildSource::Rows(rows) => {
                    let next = rows.next().await;
                    if self.token.is_cancelled() {
                        continue;
                    }
                    match next {
                        None => {
                            model.promote_build(&self.table_id, self.build_id)?;
                            self.finished = true;
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(Step::Interrupted)) => self.finished = true,
                        Some(Ok(Step::Item(pending))) => {
                            match model.admit_item(&self.table_id, self.build_id, pending)? {
                                Admission::Kept => return Ok(()),
                                Admission::Filtered => {}
                                Admission::Stale => self.finished = true,
                            }
                        }
                    }
                }
                BuildSource::Aggregate { parent, finishing } => match finishing {
                    None => {
                        let next = parent.next().await;
                        if self.token.is_cancelled() {
                            continue;
                        }
                        match next {
                            // Parent fully seen: start the finishing pass
                            None => *finishing = Some(0),
                            Some(Err(e)) => return Err(e),
                            Some(Ok(Step::Interrupted)) => self.finished = true,
                            Some(Ok(Step::Item(parent_item))) => {
                                if !model.accumulate_aggregate(
                                    &self.table_id,
                                    self.build_id,
                                    &parent_item,
                                )? {
                                    self.finished = true;
                                }
                            }
                        }
                    }
                    Some(position) => {
                        match model.finish_aggregate_at(&self.table_id, self.build_id, *position)? {
                            AggregateFinish::Kept => {
                                *position += 1;
                                return Ok(());
                            }
                            AggregateFinish::Dropped => *position += 1,
                            AggregateFinish::Done => {
                                model.promote_build(&self.table_id, self.build_id)?;
                                self.finished = true;
                            }
                            AggregateFinish::Stale => self.finished = true,
                        }
                    }
                },
            }
        }
        Ok(())
    }
}

pub(crate) enum Admission {
    Kept,
    Filtered,
    Stale,
}

pub(crate) enum AggregateFinish {
    Kept,
    Dropped,
    Done,
    Stale,
}

enum ReadPoll {
    Item(WrappedItem),
    Complete,
    Interrupted,
    NeedMore,
}

/// One reader's view of an in-flight build
struct BuildReader {
    build_id: u64,
    resets: u64,
    position: usize,
    wait_for_completion: bool,
    driver: Arc<AsyncMutex<BuildDriver>>,
}

enum CursorState {
    Start,
    Cached(VecDeque<WrappedItem>),
    Reading(BuildReader),
    Done,
}

enum Begin {
    Cached(VecDeque<WrappedItem>),
    Reading(BuildReader),
}

/// State of one `iterate()` call
struct Cursor {
    model: ModelRef,
    table_id: TableId,
    reset: bool,
    limit: Option<usize>,
    yielded: usize,
    state: CursorState,
}

impl Cursor {
    async fn next_step(&mut self) -> Option<OrigraphResult<Step<WrappedItem>>> {
        loop {
            if matches!(self.state, CursorState::Done) {
                return None;
            }
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                self.state = CursorState::Done;
                return None;
            }
            let Some(model) = self.model.get() else {
                self.state = CursorState::Done;
                return Some(Ok(Step::Interrupted));
            };
            let poll = match &mut self.state {
                CursorState::Done => return None,
                CursorState::Start => {
                    if self.reset {
                        self.reset = false;
                        if let Err(e) = model.reset_table(&self.table_id) {
                            self.state = CursorState::Done;
                            return Some(Err(e));
                        }
                    }
                    let remaining = self.limit.map_or(usize::MAX, |limit| limit - self.yielded);
                    match model.begin_read(&self.table_id, remaining) {
                        Ok(Begin::Cached(items)) => self.state = CursorState::Cached(items),
                        Ok(Begin::Reading(reader)) => self.state = CursorState::Reading(reader),
                        Err(e) => {
                            self.state = CursorState::Done;
                            return Some(Err(e));
                        }
                    }
                    continue;
                }
                CursorState::Cached(items) => match items.pop_front() {
                    Some(item) => Ok(ReadPoll::Item(item)),
                    None => Ok(ReadPoll::Complete),
                },
                CursorState::Reading(reader) => model.read_next(&self.table_id, reader).await,
            };
            return match poll {
                Ok(ReadPoll::Item(item)) => {
                    self.yielded += 1;
                    Some(Ok(Step::Item(item)))
                }
                Ok(ReadPoll::Complete) | Ok(ReadPoll::NeedMore) => {
                    self.state = CursorState::Done;
                    None
                }
                Ok(ReadPoll::Interrupted) => {
                    self.state = CursorState::Done;
                    Some(Ok(Step::Interrupted))
                }
                Err(e) => {
                    self.state = CursorState::Done;
                    Some(Err(e))
                }
            };
        }
    }
}

fn cursor_stream(cursor: Cursor) -> BoxStream<'static, OrigraphResult<Step<WrappedItem>>> {
    stream::unfold(cursor, |mut cursor| async move {
        cursor.next_step().await.map(|step| (step, cursor))
    })
    .boxed()
}

impl NetworkModel {
    /// Lazily iterate a table's items.
    ///
    /// Replays the complete cache when there is one; otherwise reads the
    /// in-flight build, driving it as needed. A reset of the table while the
    /// stream is being consumed ends the stream silently.
    pub fn iterate(
        &self,
        table_id: &str,
        options: IterateOptions,
    ) -> BoxStream<'static, OrigraphResult<WrappedItem>> {
        self.iterate_steps(ModelRef::Strong(self.clone()), table_id, options)
            .filter_map(|step| {
                futures::future::ready(match step {
                    Ok(Step::Item(item)) => Some(Ok(item)),
                    Ok(Step::Interrupted) => None,
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed()
    }

    pub(crate) fn iterate_steps(
        &self,
        model: ModelRef,
        table_id: &str,
        options: IterateOptions,
    ) -> BoxStream<'static, OrigraphResult<Step<WrappedItem>>> {
        cursor_stream(Cursor {
            model,
            table_id: table_id.to_string(),
            reset: options.reset,
            limit: options.limit,
            yielded: 0,
            state: CursorState::Start,
        })
    }

    /// Iteration used inside another table's build; holds the model weakly
    pub(crate) fn parent_steps(&self, table_id: &str) -> BoxStream<'static, OrigraphResult<Step<WrappedItem>>> {
        self.iterate_steps(
            ModelRef::Weak(self.downgrade()),
            table_id,
            IterateOptions::default(),
        )
    }

    /// Drive the table's build to completion. Returns `false` when a reset
    /// interrupted it, in which case no complete cache exists.
    pub async fn build_cache(&self, table_id: &str) -> OrigraphResult<bool> {
        let mut steps = self.iterate_steps(
            ModelRef::Weak(self.downgrade()),
            table_id,
            IterateOptions::default(),
        );
        while let Some(step) = steps.next().await {
            if let Step::Interrupted = step? {
                return Ok(false);
            }
        }
        self.read(|state| Ok(state.table(table_id)?.has_cache()))
    }

    fn begin_read(&self, table_id: &str, max_items: usize) -> OrigraphResult<Begin> {
        let mut guard = self.lock()?;
        let state: &mut ModelState = &mut guard;
        let table = state.table(table_id)?;

        if let Some(cache) = &table.cache {
            let items = cache
                .iter()
                .take(max_items)
                .map(|item| state.expose(item))
                .collect();
            return Ok(Begin::Cached(items));
        }

        let wait_for_completion = matches!(table.spec, TableSpec::Aggregated { .. });
        if let Some(partial) = &table.partial {
            return Ok(Begin::Reading(BuildReader {
                build_id: partial.build_id,
                resets: table.resets,
                position: 0,
                wait_for_completion,
                driver: partial.driver.clone(),
            }));
        }

        let source = BuildSource::for_table(self, state, table_id)?;
        let table = state.table_mut(table_id)?;
        table.builds_started += 1;
        let build_id = table.builds_started;
        let token = CancellationToken::new();
        let driver = Arc::new(AsyncMutex::new(BuildDriver {
            model: self.downgrade(),
            table_id: table_id.to_string(),
            build_id,
            token: token.clone(),
            source,
            finished: false,
        }));
        table.partial = Some(PartialBuild {
            build_id,
            token,
            cache: ItemCache::new(),
            dropped: Vec::new(),
            driver: driver.clone(),
        });
        table.notify_progress();
        debug!("Table {}: starting build {}", table_id, build_id);

        Ok(Begin::Reading(BuildReader {
            build_id,
            resets: table.resets,
            position: 0,
            wait_for_completion,
            driver,
        }))
    }

    async fn read_next(&self, table_id: &str, reader: &mut BuildReader) -> OrigraphResult<ReadPoll> {
        loop {
            match self.poll_reader(table_id, reader)? {
                ReadPoll::NeedMore => {}
                ready => return Ok(ready),
            }
            let driver = reader.driver.clone();
            let mut driver = driver.lock().await;
            // Someone else may have produced while we waited for the driver
            match self.poll_reader(table_id, reader)? {
                ReadPoll::NeedMore => {}
                ready => return Ok(ready),
            }
            if driver.finished {
                // Finished without promotion or further items: interrupted
                return Ok(ReadPoll::Interrupted);
            }
            driver.step().await?;
        }
    }

    fn poll_reader(&self, table_id: &str, reader: &mut BuildReader) -> OrigraphResult<ReadPoll> {
        let state = self.lock()?;
        let Some(table) = state.tables.get(table_id) else {
            return Ok(ReadPoll::Interrupted);
        };
        if table.resets != reader.resets {
            return Ok(ReadPoll::Interrupted);
        }
        if let Some(cache) = &table.cache {
            return Ok(match cache.at(reader.position) {
                Some(item) => {
                    reader.position += 1;
                    ReadPoll::Item(state.expose(item))
                }
                None => ReadPoll::Complete,
            });
        }
        match &table.partial {
            Some(partial) if partial.build_id == reader.build_id => {
                if reader.wait_for_completion {
                    return Ok(ReadPoll::NeedMore);
                }
                Ok(match partial.cache.at(reader.position) {
                    Some(item) => {
                        reader.position += 1;
                        ReadPoll::Item(state.expose(item))
                    }
                    None => ReadPoll::NeedMore,
                })
            }
            _ => Ok(ReadPoll::Interrupted),
        }
    }

    /// Wrap, connect and finish one produced item
    fn admit_item(&self, table_id: &str, build_id: u64, pending: PendingItem) -> OrigraphResult<Admission> {
        let mut guard = self.lock()?;
        let state: &mut ModelState = &mut guard;
        if !state.is_current_build(table_id, build_id) {
            return Ok(Admission::Stale);
        }

        let mut item = WrappedItem::new(table_id, pending.index, pending.row);
        for other in &pending.connect_to {
            state.link(&mut item, other);
        }

        let functions = state.functions.clone();
        let table = state.table_mut(table_id)?;
        let keep = table.finish_item(&mut item, &functions);
        if keep {
            if let Some(partial) = table.partial.as_mut() {
                partial.cache.insert(item);
            }
            table.notify_progress();
            Ok(Admission::Kept)
        } else {
            state.disconnect_item(&item);
            Ok(Admission::Filtered)
        }
    }

    /// First aggregation pass: fold one parent row into its group. Returns
    /// `false` if the build is no longer current.
    fn accumulate_aggregate(&self, table_id: &str, build_id: u64, parent: &WrappedItem) -> OrigraphResult<bool> {
        let mut guard = self.lock()?;
        let state: &mut ModelState = &mut guard;
        if !state.is_current_build(table_id, build_id) {
            return Ok(false);
        }
        let functions = state.functions.clone();
        let table = state.table_mut(table_id)?;
        let TableSpec::Aggregated { attribute } = &table.spec else {
            return Err(OrigraphError::InvalidOption(format!(
                "Table {} is not an aggregated table",
                table_id
            )));
        };
        let index = value_to_key(parent.get(attribute));
        let reducers: Vec<_> = table
            .config
            .reduce_attributes
            .iter()
            .filter_map(|(attr, name)| match functions.reducer(name) {
                Some(func) => Some((attr.clone(), func)),
                None => {
                    log::warn!(
                        "Table {}: reducer '{}' for '{}' is not registered",
                        table_id,
                        name,
                        attr
                    );
                    None
                }
            })
            .collect();

        let Some(partial) = table.partial.as_mut() else {
            return Ok(false);
        };
        let is_new = !partial.cache.contains(&index);
        if is_new {
            partial
                .cache
                .insert(WrappedItem::new(table_id, index.clone(), serde_json::json!({})));
        }
        if let Some(aggregate) = partial.cache.get_mut(&index) {
            aggregate.add_connection(&parent.table_id, &parent.index);
            for (attr, func) in &reducers {
                let value = func(aggregate, parent);
                aggregate.set(attr.clone(), value);
            }
        }
        if is_new {
            table.notify_progress();
        }
        if let Some(live_parent) = state.lookup_item_mut(&parent.table_id, &parent.index) {
            live_parent.add_connection(table_id, &index);
        }
        Ok(true)
    }

    /// Second aggregation pass: finish the row at `position`
    fn finish_aggregate_at(&self, table_id: &str, build_id: u64, position: usize) -> OrigraphResult<AggregateFinish> {
        let mut guard = self.lock()?;
        let state: &mut ModelState = &mut guard;
        if !state.is_current_build(table_id, build_id) {
            return Ok(AggregateFinish::Stale);
        }
        let functions = state.functions.clone();
        let table = state.table_mut(table_id)?;
        let Some(mut item) = table
            .partial
            .as_ref()
            .and_then(|partial| partial.cache.at(position))
            .cloned()
        else {
            return Ok(AggregateFinish::Done);
        };

        let keep = table.finish_item(&mut item, &functions);
        if keep {
            if let Some(partial) = table.partial.as_mut() {
                partial.cache.insert(item);
            }
            Ok(AggregateFinish::Kept)
        } else {
            if let Some(partial) = table.partial.as_mut() {
                partial.dropped.push(item.index.clone());
            }
            state.disconnect_item(&item);
            Ok(AggregateFinish::Dropped)
        }
    }

    /// Turn the partial cache of a finished build into the complete cache
    fn promote_build(&self, table_id: &str, build_id: u64) -> OrigraphResult<bool> {
        let mut guard = self.lock()?;
        let state: &mut ModelState = &mut guard;
        if !state.is_current_build(table_id, build_id) {
            return Ok(false);
        }
        let table = state.table_mut(table_id)?;
        let Some(mut partial) = table.partial.take() else {
            return Ok(false);
        };
        partial.cache.remove_all(&partial.dropped);
        info!(
            "Table {}: cache complete with {} items",
            table_id,
            partial.cache.len()
        );
        table.cache = Some(partial.cache);
        table.notify_progress();
        Ok(true)
    }

    /// Subscribe to a table's build progress (item admitted, promoted, reset)
    pub fn watch_progress(&self, table_id: &str) -> OrigraphResult<watch::Receiver<u64>> {
        self.read(|state| Ok(state.table(table_id)?.progress.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_iterate_options() {
        assert_eq!(IterateOptions::with_limit(3).limit, Some(3));
        assert!(IterateOptions::with_reset().reset);
        assert_eq!(IterateOptions::default().limit, None);
    }
}
