use std::sync::Arc;

use ndarray::{s, stack, Array2, Array3, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::algebra::{self, TileDetector};
use crate::band_key::BandKey;
use crate::cloud::{cloud_probability_layer, CloudDetector};
use crate::composite::{
    assign_tiles, cloud_pixel_select, median_block, ndvi_pixel_select, per_tile_select, Candidate,
    SelectionState,
};
use crate::consts::{CLOUD_NODATA, NDVI_INITIAL_SCORE};
use crate::error::{CompositeError, Result};
use crate::granule::Granule;
use crate::io::{block_windows, RasterIo};
use crate::worker::{CompositeOutput, Worker, WorkerOptions};

use super::config::{CompositeConfig, CompositeMethod};
use super::types::{NoOpReporter, PipelineStage, ProgressReporter};

/// Run a composite job and write its result.
pub fn run_composite(
    config: &CompositeConfig,
    io: Arc<dyn RasterIo>,
    detector: Option<&dyn CloudDetector>,
) -> Result<CompositeOutput> {
    run_composite_reported(config, io, detector, Arc::new(NoOpReporter))
}

/// Run a composite job with a thread-safe progress reporter.
///
/// Cloud-probability compositing computes a `CLD` layer per granule with
/// `detector`; without one, every granule must already carry a `CLD` raster.
pub fn run_composite_reported(
    config: &CompositeConfig,
    io: Arc<dyn RasterIo>,
    detector: Option<&dyn CloudDetector>,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<CompositeOutput> {
    config.validate()?;

    let mut extra_bands = config.method.required_bands();
    if let CompositeMethod::CloudProbabilityPerPixel { .. } = config.method {
        match detector {
            Some(d) => extra_bands.extend(d.input_bands()),
            None => {
                info!("No cloud detector given, expecting precomputed CLD layers");
                extra_bands.push(BandKey::Cld);
            }
        }
    }

    reporter.begin_stage(PipelineStage::Discovering, None);
    let options = WorkerOptions {
        granule: config.granule_options(),
        extra_bands,
        output: config.output.clone(),
    };
    let mut worker = Worker::new(
        &config.input,
        config.resolution,
        config.slice_index,
        &config.output_bands,
        options,
        Arc::clone(&io),
    )?;
    reporter.finish_stage();

    if let Some(crs) = &config.target_crs {
        reporter.begin_stage(PipelineStage::Reprojecting, Some(worker.granules().len()));
        worker.reproject(crs)?;
        reporter.finish_stage();
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.load_threads.unwrap_or(0))
        .build()
        .map_err(|e| CompositeError::Config(format!("load pool: {e}")))?;

    info!(
        method = config.method.name(),
        granules = worker.granules().len(),
        resolution = %worker.resolution(),
        "Running composite"
    );
    match config.method {
        CompositeMethod::NdviPerPixel { batch_size } => {
            ndvi_composite(&mut worker, &pool, batch_size, reporter.as_ref())?
        }
        CompositeMethod::CloudProbabilityPerPixel { batch_size } => {
            cloud_composite(&mut worker, &pool, batch_size, detector, reporter.as_ref())?
        }
        CompositeMethod::MedianPerPixel { block_size } => {
            median_composite(&mut worker, &pool, block_size, reporter.as_ref())?
        }
        CompositeMethod::PerTile { detector } => {
            per_tile_composite(&mut worker, detector, reporter.as_ref())?
        }
    }

    reporter.begin_stage(PipelineStage::Writing, Some(worker.result().len()));
    let output = worker.save_result(config.quicklook)?;
    reporter.finish_stage();
    worker.release_bands();
    info!(path = %output.result_dir.display(), files = output.files.len(), "Composite done");
    Ok(output)
}

/// Load `keys` of every granule in `batch` on `pool`. Granules failing with a
/// storage error are dropped with a warning; any other error aborts.
fn load_batch<'g>(
    pool: &ThreadPool,
    batch: &'g mut [Granule],
    keys: &[BandKey],
) -> Result<Vec<&'g mut Granule>> {
    let outcomes: Vec<Result<()>> =
        pool.install(|| batch.par_iter_mut().map(|g| g.load_bands(Some(keys))).collect());

    let mut ready = Vec::with_capacity(batch.len());
    for (granule, outcome) in batch.iter_mut().zip(outcomes) {
        match outcome {
            Ok(()) => ready.push(granule),
            Err(e) if e.is_storage() => {
                warn!(granule = %granule.name(), error = %e, "Dropping granule from batch");
                granule.free_resources();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(ready)
}

fn union(a: &[BandKey], b: &[BandKey]) -> Vec<BandKey> {
    let mut keys = a.to_vec();
    for key in b {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

fn batch_count(granules: usize, batch_size: usize) -> usize {
    granules.div_ceil(batch_size)
}

fn ndvi_composite(
    worker: &mut Worker,
    pool: &ThreadPool,
    batch_size: usize,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let shape = worker.grid_shape()?;
    let bands = worker.output_bands().to_vec();
    let keys = union(&bands, &algebra::NDVI_BANDS);
    let mut state = SelectionState::new(bands.len(), shape, NDVI_INITIAL_SCORE);

    let batches = batch_count(worker.granules().len(), batch_size);
    info!(batches, batch_size, "NDVI iterations expected");
    reporter.begin_stage(PipelineStage::Compositing, Some(batches));
    for (i, batch) in worker.granules_mut().chunks_mut(batch_size).enumerate() {
        let mut ready = load_batch(pool, batch, &keys)?;
        if ready.is_empty() {
            warn!(batch = i, "Every granule of the batch was dropped");
            reporter.advance(i + 1);
            continue;
        }
        let mut signals = Vec::with_capacity(ready.len());
        let mut cubes = Vec::with_capacity(ready.len());
        let mut doys = Vec::with_capacity(ready.len());
        for granule in ready.iter_mut() {
            signals.push(algebra::masked_ndvi(granule)?);
            cubes.push(granule.stack(Some(bands.as_slice()), false)?);
            doys.push(granule.doy());
            granule.free_resources();
        }
        let candidates: Vec<Candidate<'_, f32>> = signals
            .iter()
            .zip(&cubes)
            .zip(&doys)
            .map(|((signal, data), &doy)| Candidate {
                signal: signal.view(),
                data: data.view(),
                doy,
            })
            .collect();
        debug!(batch = i, doys = ?doys, "NDVI batch");
        ndvi_pixel_select(&candidates, &mut state)?;
        reporter.advance(i + 1);
    }
    reporter.finish_stage();
    worker.set_result(state.data, Some(state.doy))
}

fn cloud_composite(
    worker: &mut Worker,
    pool: &ThreadPool,
    batch_size: usize,
    detector: Option<&dyn CloudDetector>,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    worker.sort_by_doy();
    let shape = worker.grid_shape()?;
    let bands = worker.output_bands().to_vec();
    let io = Arc::clone(worker.io());

    if let Some(detector) = detector {
        reporter.begin_stage(PipelineStage::CloudDetection, Some(worker.granules().len()));
        for (i, granule) in worker.granules_mut().iter_mut().enumerate() {
            let dir = granule.path().to_path_buf();
            cloud_probability_layer(granule, detector, io.as_ref(), &dir)?;
            granule.free_resources();
            reporter.advance(i + 1);
        }
        reporter.finish_stage();
    }

    let keys = union(&bands, &[BandKey::Cld]);
    let mut state = SelectionState::new(bands.len(), shape, CLOUD_NODATA);
    let batches = batch_count(worker.granules().len(), batch_size);
    info!(batches, batch_size, "Cloud probability iterations expected");
    reporter.begin_stage(PipelineStage::Compositing, Some(batches));
    for (i, batch) in worker.granules_mut().chunks_mut(batch_size).enumerate() {
        let mut ready = load_batch(pool, batch, &keys)?;
        if ready.is_empty() {
            warn!(batch = i, "Every granule of the batch was dropped");
            reporter.advance(i + 1);
            continue;
        }
        let mut masks = Vec::with_capacity(ready.len());
        let mut cubes = Vec::with_capacity(ready.len());
        let mut doys = Vec::with_capacity(ready.len());
        for granule in ready.iter_mut() {
            masks.push(granule.raster(&BandKey::Cld)?.mapv(|v| v.min(CLOUD_NODATA as u16) as u8));
            cubes.push(granule.stack(Some(bands.as_slice()), false)?);
            doys.push(granule.doy());
            granule.free_resources();
        }
        let candidates: Vec<Candidate<'_, u8>> = masks
            .iter()
            .zip(&cubes)
            .zip(&doys)
            .map(|((signal, data), &doy)| Candidate {
                signal: signal.view(),
                data: data.view(),
                doy,
            })
            .collect();
        debug!(batch = i, doys = ?doys, "Cloud probability batch");
        cloud_pixel_select(&candidates, &mut state)?;
        reporter.advance(i + 1);
    }
    reporter.finish_stage();
    worker.set_result(state.data, Some(state.doy))
}

fn median_composite(
    worker: &mut Worker,
    pool: &ThreadPool,
    block_size: usize,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let (h, w) = worker.grid_shape()?;
    let bands = worker.output_bands().to_vec();
    let windows = block_windows(h, w, block_size);
    let mut result = Array3::<u16>::zeros((bands.len(), h, w));
    info!(bands = ?bands, blocks = windows.len(), "Running per-pixel median");

    reporter.begin_stage(PipelineStage::Compositing, Some(bands.len() * windows.len()));
    let granules = worker.granules();
    let mut done = 0;
    for (b, key) in bands.iter().enumerate() {
        for window in &windows {
            let outcomes: Vec<Result<Array2<u16>>> = pool.install(|| {
                granules
                    .par_iter()
                    .map(|g| g.get(key)?.read_block(*window))
                    .collect()
            });
            let mut blocks = Vec::with_capacity(outcomes.len());
            for (granule, outcome) in granules.iter().zip(outcomes) {
                match outcome {
                    Ok(block) => blocks.push(block),
                    Err(e) if e.is_storage() => {
                        warn!(granule = %granule.name(), band = %key, error = %e, "Skipping unreadable block")
                    }
                    Err(e) => return Err(e),
                }
            }
            if blocks.is_empty() {
                return Err(CompositeError::EmptySequence);
            }
            let views: Vec<_> = blocks.iter().map(|a| a.view()).collect();
            let data = stack(Axis(0), &views).map_err(|_| CompositeError::ShapeMismatch {
                expected: vec![window.height, window.width],
                found: views.iter().flat_map(|v| [v.nrows(), v.ncols()]).collect(),
            })?;
            let medians = median_block(data.view())?;
            result
                .slice_mut(s![
                    b,
                    window.row_off..window.row_off + window.height,
                    window.col_off..window.col_off + window.width
                ])
                .assign(&medians);
            done += 1;
            reporter.advance(done);
        }
        info!(band = %key, "Median done");
    }
    reporter.finish_stage();
    worker.set_result(result, None)
}

fn per_tile_composite(
    worker: &mut Worker,
    detector: TileDetector,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let slice_index = worker.slice_index();
    let shape = worker.grid_shape()?;
    let bands = worker.output_bands().to_vec();
    let slices = slice_index * slice_index;
    let count = worker.granules().len();

    reporter.begin_stage(PipelineStage::Scoring, Some(count));
    let mut scores = Array2::<f32>::from_elem((count, slices), f32::NAN);
    for (i, granule) in worker.granules_mut().iter_mut().enumerate() {
        match algebra::per_tile_cloud_index(granule, detector) {
            Ok(row) => scores.row_mut(i).assign(&row),
            Err(e) if e.is_storage() => {
                warn!(granule = %granule.name(), error = %e, "Granule cannot be scored, it will not win any tile")
            }
            Err(e) => return Err(e),
        }
        granule.free_resources();
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let assignments = assign_tiles(scores.view())?;
    reporter.begin_stage(PipelineStage::Compositing, None);
    let granules = worker.granules_mut();
    let (data, doy) = per_tile_select(&assignments, bands.len(), slice_index, shape, |g| {
        let granule = &mut granules[g];
        let stack = granule.stack(Some(bands.as_slice()), false)?;
        granule.free_resources();
        info!(granule = %granule.name(), doy = granule.doy(), "Tiles taken from granule");
        Ok((stack, granule.doy()))
    })?;
    reporter.finish_stage();
    worker.set_result(data, Some(doy))
}
