use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cellfield_common::{Cell, CellCoord, Region, TypeStyle};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Failure reported by a world data source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("data source error: {0}")]
    Source(String),
    #[error("data source dropped the request without answering")]
    Disconnected,
    #[error("region of {cells} cells exceeds the source ceiling of {ceiling}")]
    Rejected { cells: u64, ceiling: u64 },
}

/// Cells and type styles returned for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellBatch {
    pub cells: Vec<Cell>,
    pub types: Vec<TypeStyle>,
}

/// A request in flight. Polling never blocks.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<Result<T, FetchError>>,
    region: Region,
}

/// Completes the matching [`Pending`].
#[derive(Debug)]
pub struct Responder<T> {
    tx: Sender<Result<T, FetchError>>,
}

impl<T> Responder<T> {
    pub fn resolve(self, result: Result<T, FetchError>) {
        // The requester may have been dropped; nothing to do then.
        let _ = self.tx.send(result);
    }
}

impl<T> Pending<T> {
    pub fn channel(region: Region) -> (Responder<T>, Pending<T>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Responder { tx }, Pending { rx, region })
    }

    /// An already-resolved request.
    pub fn ready(region: Region, result: Result<T, FetchError>) -> Self {
        let (responder, pending) = Self::channel(region);
        responder.resolve(result);
        pending
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// `None` while the source is still working.
    pub fn poll(&self) -> Option<Result<T, FetchError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(FetchError::Disconnected)),
        }
    }

    /// Block until the source answers.
    pub fn wait(self) -> Result<T, FetchError> {
        self.rx.recv().unwrap_or(Err(FetchError::Disconnected))
    }
}

/// The external provider of world data. Implementations must be idempotent
/// for identical regions.
pub trait WorldDataSource {
    fn fetch_cells(&self, region: &Region) -> Pending<CellBatch>;
    fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>>;
}

impl<S: WorldDataSource + ?Sized> WorldDataSource for Arc<S> {
    fn fetch_cells(&self, region: &Region) -> Pending<CellBatch> {
        (**self).fetch_cells(region)
    }

    fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>> {
        (**self).fetch_types(region)
    }
}

/// Data source over a fixed set of cells, answering synchronously.
#[derive(Debug, Default)]
pub struct InMemorySource {
    cells: BTreeMap<CellCoord, Cell>,
    types: Vec<TypeStyle>,
    ceiling: Option<u64>,
    fetches: AtomicUsize,
    fail_next: AtomicBool,
}

impl InMemorySource {
    pub fn new(cells: impl IntoIterator<Item = Cell>, types: Vec<TypeStyle>) -> Self {
        Self {
            cells: cells.into_iter().map(|c| (c.coord, c)).collect(),
            types,
            ..Self::default()
        }
    }

    /// Reject regions larger than `ceiling` cells.
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    /// Number of `fetch_cells` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Make the next `fetch_cells` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

impl WorldDataSource for InMemorySource {
    fn fetch_cells(&self, region: &Region) -> Pending<CellBatch> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Pending::ready(*region, Err(FetchError::Source("injected failure".into())));
        }
        if let Some(ceiling) = self.ceiling
            && region.total_cells() > ceiling
        {
            let err = FetchError::Rejected {
                cells: region.total_cells(),
                ceiling,
            };
            return Pending::ready(*region, Err(err));
        }
        let cells = self
            .cells
            .values()
            .filter(|c| region.contains(c.coord))
            .cloned()
            .collect();
        Pending::ready(
            *region,
            Ok(CellBatch {
                cells,
                types: self.types.clone(),
            }),
        )
    }

    fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>> {
        Pending::ready(*region, Ok(self.types.clone()))
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Runs every fetch of an inner source on a dedicated worker thread, so a slow
/// source never stalls the caller.
pub struct BackgroundSource<S> {
    inner: Arc<S>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl<S> BackgroundSource<S>
where
    S: WorldDataSource + Send + Sync + 'static,
{
    pub fn new(inner: S) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name("cellfield-fetch".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .map_err(|err| tracing::warn!(%err, "fetch worker unavailable, running inline"))
            .ok();
        Self {
            inner: Arc::new(inner),
            jobs: worker.as_ref().map(|_| tx),
            worker,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Requests handed to the worker and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn dispatch<T, F>(&self, region: &Region, fetch: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&S, &Region) -> Pending<T> + Send + 'static,
    {
        let (responder, pending) = Pending::channel(*region);
        let inner = Arc::clone(&self.inner);
        let in_flight = Arc::clone(&self.in_flight);
        let region = *region;
        let job: Job = Box::new(move || {
            let result = fetch(&*inner, &region).wait();
            in_flight.fetch_sub(1, Ordering::Relaxed);
            responder.resolve(result);
        });

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        match &self.jobs {
            Some(tx) => {
                if let Err(err) = tx.send(job) {
                    // Worker is gone: run on the caller's thread instead.
                    (err.into_inner())();
                }
            }
            None => job(),
        }
        pending
    }
}

impl<S> WorldDataSource for BackgroundSource<S>
where
    S: WorldDataSource + Send + Sync + 'static,
{
    fn fetch_cells(&self, region: &Region) -> Pending<CellBatch> {
        self.dispatch(region, |s, r| s.fetch_cells(r))
    }

    fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>> {
        self.dispatch(region, |s, r| s.fetch_types(r))
    }
}

impl<S> Drop for BackgroundSource<S> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> InMemorySource {
        InMemorySource::new(
            (0..4).map(|i| Cell::new(CellCoord::new(i, 0, 0), "tierra")),
            vec![TypeStyle::new("tierra").with_color("#8B4513")],
        )
    }

    #[test]
    fn in_memory_filters_by_region() {
        let src = source();
        let batch = src
            .fetch_cells(&Region::new((1, 2), (0, 0), (0, 0)))
            .wait()
            .unwrap();
        assert_eq!(batch.cells.len(), 2);
        assert_eq!(batch.types.len(), 1);
        assert_eq!(src.fetch_count(), 1);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let src = source();
        src.fail_next();
        let region = Region::new((0, 3), (0, 0), (0, 0));
        assert!(src.fetch_cells(&region).wait().is_err());
        assert!(src.fetch_cells(&region).wait().is_ok());
    }

    #[test]
    fn ceiling_rejects_large_regions() {
        let src = source().with_ceiling(2);
        let err = src
            .fetch_cells(&Region::new((0, 3), (0, 0), (0, 0)))
            .wait()
            .unwrap_err();
        assert_eq!(err, FetchError::Rejected { cells: 4, ceiling: 2 });
    }

    #[test]
    fn poll_reports_pending_then_result() {
        let region = Region::new((0, 0), (0, 0), (0, 0));
        let (responder, pending) = Pending::<u32>::channel(region);
        assert!(pending.poll().is_none());
        responder.resolve(Ok(7));
        assert_eq!(pending.poll(), Some(Ok(7)));
    }

    #[test]
    fn dropped_responder_is_disconnected() {
        let region = Region::new((0, 0), (0, 0), (0, 0));
        let (responder, pending) = Pending::<u32>::channel(region);
        drop(responder);
        assert_eq!(pending.poll(), Some(Err(FetchError::Disconnected)));
    }

    #[test]
    fn background_source_resolves_off_thread() {
        let bg = BackgroundSource::new(source());
        let pending = bg.fetch_cells(&Region::new((0, 3), (0, 0), (0, 0)));
        let batch = pending.wait().unwrap();
        assert_eq!(batch.cells.len(), 4);
        assert_eq!(bg.inner().fetch_count(), 1);
    }
}
