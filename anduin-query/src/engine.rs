//! The search engine: facade + scratch pool + the route pipeline.

use crate::alternatives::{self, Alternative};
use crate::phantom::{self, PhantomNode};
use crate::scratch::ScratchPool;
use crate::unpack::{self, UnpackedEdge};
use crate::{Error, bidir};
use anduin_graph::facade::{DataFacade, FacadeError, SwapBarrier};
use anduin_graph::{EdgeWeight, FixedCoordinate};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::trace;

pub struct RouteOutput {
    pub weight: EdgeWeight,
    pub edges: Vec<UnpackedEdge>,
    pub alternative: Option<Alternative>,
}

/// Owns a facade and serves point-to-point queries against it.
///
/// The engine is shared across worker threads; each thread pulls its own
/// scratch bundle from the pool. When the facade reads a hot-swappable
/// region, every query registers with the region's swap barrier and, if a
/// new generation was published, reloads the facade before searching.
pub struct SearchEngine<F> {
    facade: RwLock<F>,
    pool: ScratchPool,
    barrier: Option<Arc<SwapBarrier>>,
}

impl<F: DataFacade> SearchEngine<F> {
    pub fn new(facade: F) -> Self {
        let pool = ScratchPool::new(facade.num_nodes());
        Self {
            facade: RwLock::new(facade),
            pool,
            barrier: None,
        }
    }

    /// An engine whose queries coordinate with dataset writers through the
    /// given swap barrier (see [`anduin_graph::facade::SharedDataFacade::barrier`]).
    pub fn with_barrier(facade: F, barrier: Arc<SwapBarrier>) -> Self {
        let mut engine = Self::new(facade);
        engine.barrier = Some(barrier);
        engine
    }

    /// Runs one query against a single consistent dataset generation.
    ///
    /// Takes the swap-barrier query ticket first (blocking writers out for
    /// the whole query), reloads the facade if the region advanced, then
    /// hands a read-locked [`QuerySession`] to `f`. Locals drop in reverse
    /// order, so the ticket outlives every dataset reference.
    pub fn run_query<R>(
        &self,
        f: impl FnOnce(&QuerySession<'_, F>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let _ticket = self.barrier.as_ref().map(|barrier| barrier.begin_query());
        if self.facade.read().map_err(|_| poisoned())?.is_stale() {
            let mut facade = self.facade.write().map_err(|_| poisoned())?;
            facade.reload().map_err(|error| match error {
                // The writer has created the region but not finished its
                // first publish; the dataset will be there shortly.
                FacadeError::RegionUninitialized(_) => Error::TransientUnavailability,
                other => Error::DataCorruption(other.to_string()),
            })?;
        }
        let facade = self.facade.read().map_err(|_| poisoned())?;
        f(&QuerySession {
            facade,
            pool: &self.pool,
        })
    }
}

/// A worker panicked mid-query and poisoned the facade lock; the engine
/// cannot safely hand out the dataset any more.
fn poisoned() -> Error {
    Error::ResourceExhaustion("facade lock poisoned by a failed query".into())
}

/// One query's view of the engine: a read-locked facade plus the scratch
/// pool. Lives no longer than the barrier ticket it was issued under.
pub struct QuerySession<'a, F> {
    facade: RwLockReadGuard<'a, F>,
    pool: &'a ScratchPool,
}

impl<F: DataFacade> QuerySession<'_, F> {
    pub fn facade(&self) -> &F {
        &self.facade
    }

    /// Snaps a coordinate onto the network.
    pub fn resolve(&self, coordinate: FixedCoordinate, zoom: u32) -> Result<PhantomNode, Error> {
        phantom::resolve(&*self.facade, coordinate, zoom)
    }

    /// One route leg between two phantoms, optionally with an alternative.
    pub fn route(
        &self,
        source: &PhantomNode,
        target: &PhantomNode,
        want_alternative: bool,
    ) -> Result<RouteOutput, Error> {
        let facade = &*self.facade;
        self.pool.with(|scratch| {
            let result = bidir::shortest_path(facade, scratch, source, target)?;
            trace!(
                "route weight {} meeting at {}",
                result.weight, result.meeting_node
            );
            let packed = unpack::reconstruct_packed_path(scratch, result.meeting_node);
            let edges = unpack::unpack_path(facade, &packed)?;
            let alternative = if want_alternative {
                alternatives::find_alternative(facade, scratch, result, &edges)
            } else {
                None
            };
            Ok(RouteOutput {
                weight: result.weight,
                edges,
                alternative,
            })
        })
    }
}
