//! Python bindings over NumPy arrays. NaN marks an invalid pixel on both sides.

use crate::core::{ChangeEngine, QualityMaskDecoder, TemporalAccumulator, TrendAccumulator, TrendReducer};
use crate::types::{BandData, ChangeError, Raster, SensorKind, ValidityMask};
use chrono::{TimeZone, Utc};
use ndarray::{ArrayView2, Axis};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: ChangeError) -> PyErr {
    match e {
        ChangeError::GridMismatch { .. }
        | ChangeError::GeoTransformMismatch
        | ChangeError::MissingBand { .. }
        | ChangeError::EmptyCollection(_)
        | ChangeError::InsufficientScenes { .. }
        | ChangeError::InvalidParameter(_) => PyErr::new::<PyValueError, _>(format!("{}", e)),
        ChangeError::Processing(_) => PyErr::new::<PyRuntimeError, _>(format!("{}", e)),
    }
}

fn parse_sensor(sensor: &str) -> PyResult<SensorKind> {
    match sensor.to_lowercase().as_str() {
        "legacy" | "l5" | "landsat5" => Ok(SensorKind::Legacy),
        "modern" | "l8" | "landsat8" => Ok(SensorKind::Modern),
        _ => Err(PyErr::new::<PyValueError, _>(format!(
            "Invalid sensor: {} (expected 'legacy' or 'modern')",
            sensor
        ))),
    }
}

fn finite_mask(values: &BandData) -> ValidityMask {
    values.map(|v| v.is_finite())
}

fn to_raster(name: &str, values: ArrayView2<f64>) -> PyResult<Raster> {
    let data = values.to_owned();
    let mask = finite_mask(&data);
    Raster::from_parts(name, data, mask, None).map_err(to_py_err)
}

fn primary_data(raster: &Raster) -> PyResult<BandData> {
    raster
        .primary_band()
        .map(|band| band.data.clone())
        .map_err(to_py_err)
}

/// `(a - b) / (a + b)` per pixel
#[pyfunction]
fn normalized_difference<'py>(
    py: Python<'py>,
    a: PyReadonlyArray2<'py, f64>,
    b: PyReadonlyArray2<'py, f64>,
) -> PyResult<&'py PyArray2<f64>> {
    let (a, b) = (a.as_array(), b.as_array());
    if a.dim() != b.dim() {
        return Err(PyErr::new::<PyValueError, _>(format!(
            "Shape mismatch: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(crate::core::normalized_difference(&a.to_owned(), &b.to_owned()).into_pyarray(py))
}

/// Boolean clear-sky mask decoded from a QA band
#[pyfunction]
fn qa_clear_mask<'py>(
    py: Python<'py>,
    qa: PyReadonlyArray2<'py, f64>,
    sensor: &str,
) -> PyResult<&'py PyArray2<bool>> {
    let decoder = QualityMaskDecoder::new(parse_sensor(sensor)?);
    Ok(decoder.decode(&qa.as_array().to_owned()).into_pyarray(py))
}

/// (mean, stdDev, count) over axis 0 of a (time, rows, cols) stack
#[pyfunction]
fn temporal_composite<'py>(
    py: Python<'py>,
    stack: PyReadonlyArray3<'py, f64>,
) -> PyResult<(&'py PyArray2<f64>, &'py PyArray2<f64>, &'py PyArray2<f64>)> {
    let stack = stack.as_array();
    let (scenes, rows, cols) = stack.dim();
    if scenes == 0 {
        return Err(to_py_err(ChangeError::EmptyCollection(
            "temporal composite needs at least one raster".to_string(),
        )));
    }

    let mut acc = TemporalAccumulator::new(rows, cols);
    for values in stack.axis_iter(Axis(0)) {
        let values = values.to_owned();
        acc.push_band(&values, &finite_mask(&values)).map_err(to_py_err)?;
    }
    let composites = acc.finish().map_err(to_py_err)?;

    Ok((
        primary_data(&composites.mean)?.into_pyarray(py),
        primary_data(&composites.std_dev)?.into_pyarray(py),
        primary_data(&composites.count)?.into_pyarray(py),
    ))
}

/// Percent change of `cur_mean` against `ref_mean`
#[pyfunction]
fn relative_change<'py>(
    py: Python<'py>,
    ref_mean: PyReadonlyArray2<'py, f64>,
    cur_mean: PyReadonlyArray2<'py, f64>,
) -> PyResult<&'py PyArray2<f64>> {
    let reference = to_raster("mean", ref_mean.as_array())?;
    let current = to_raster("mean", cur_mean.as_array())?;
    let change = ChangeEngine::new()
        .relative_change(&reference, &current)
        .map_err(to_py_err)?;
    Ok(primary_data(&change)?.into_pyarray(py))
}

/// Z-score of `cur_mean` against the reference distribution
#[pyfunction]
fn standardized_anomaly<'py>(
    py: Python<'py>,
    ref_mean: PyReadonlyArray2<'py, f64>,
    cur_mean: PyReadonlyArray2<'py, f64>,
    ref_std_dev: PyReadonlyArray2<'py, f64>,
) -> PyResult<&'py PyArray2<f64>> {
    let reference = to_raster("mean", ref_mean.as_array())?;
    let current = to_raster("mean", cur_mean.as_array())?;
    let spread = to_raster("stdDev", ref_std_dev.as_array())?;
    let anomaly = ChangeEngine::new()
        .standardized_anomaly(&reference, &current, &spread)
        .map_err(to_py_err)?;
    Ok(primary_data(&anomaly)?.into_pyarray(py))
}

/// Per-pixel (scale, offset) of a least-squares line through a (time, rows, cols)
/// stack acquired at `times_ms` (epoch milliseconds)
#[pyfunction]
#[pyo3(signature = (stack, times_ms, time_scale = None))]
fn linear_trend<'py>(
    py: Python<'py>,
    stack: PyReadonlyArray3<'py, f64>,
    times_ms: Vec<i64>,
    time_scale: Option<f64>,
) -> PyResult<(&'py PyArray2<f64>, &'py PyArray2<f64>)> {
    let stack = stack.as_array();
    let (scenes, rows, cols) = stack.dim();
    if scenes != times_ms.len() {
        return Err(PyErr::new::<PyValueError, _>(format!(
            "Got {} rasters but {} timestamps",
            scenes,
            times_ms.len()
        )));
    }
    let reducer = match time_scale {
        Some(scale) => TrendReducer::new(scale).map_err(to_py_err)?,
        None => TrendReducer::default(),
    };

    let mut acc = TrendAccumulator::new(rows, cols);
    for (values, &ms) in stack.axis_iter(Axis(0)).zip(times_ms.iter()) {
        let acquired = Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
            PyErr::new::<PyValueError, _>(format!("Invalid timestamp: {} ms", ms))
        })?;
        let values = values.to_owned();
        acc.push_band(reducer.time_coordinate(acquired), &values, &finite_mask(&values))
            .map_err(to_py_err)?;
    }
    let trend = acc.finish().map_err(to_py_err)?;

    Ok((
        primary_data(&trend.scale)?.into_pyarray(py),
        primary_data(&trend.offset)?.into_pyarray(py),
    ))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
    m.add_function(wrap_pyfunction!(qa_clear_mask, m)?)?;
    m.add_function(wrap_pyfunction!(temporal_composite, m)?)?;
    m.add_function(wrap_pyfunction!(relative_change, m)?)?;
    m.add_function(wrap_pyfunction!(standardized_anomaly, m)?)?;
    m.add_function(wrap_pyfunction!(linear_trend, m)?)?;
    Ok(())
}
