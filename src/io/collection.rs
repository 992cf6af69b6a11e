use crate::types::{ChangeError, ChangeResult, ScenePayload, SensorKind};
use chrono::{DateTime, Utc};

/// Ordered scenes handed over by the catalog collaborator.
///
/// Date, calendar-month, cloud-cover and bounds filtering has already
/// happened upstream; this type only carries and validates the result.
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    scenes: Vec<ScenePayload>,
}

/// Human-readable overview of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSummary {
    pub scene_count: usize,
    pub legacy_count: usize,
    pub modern_count: usize,
    pub first_acquired: Option<DateTime<Utc>>,
    pub last_acquired: Option<DateTime<Utc>>,
    pub first_scene_bands: Vec<String>,
}

impl std::fmt::Display for CollectionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scenes ({} legacy, {} modern)",
            self.scene_count, self.legacy_count, self.modern_count
        )?;
        if let (Some(first), Some(last)) = (self.first_acquired, self.last_acquired) {
            write!(
                f,
                ", {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            )?;
        }
        if !self.first_scene_bands.is_empty() {
            write!(f, ", bands [{}]", self.first_scene_bands.join(", "))?;
        }
        Ok(())
    }
}

impl SceneCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scenes(scenes: Vec<ScenePayload>) -> Self {
        Self { scenes }
    }

    pub fn push(&mut self, scene: ScenePayload) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[ScenePayload] {
        &self.scenes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScenePayload> {
        self.scenes.iter()
    }

    /// Concatenate two collections, e.g. a legacy and a modern series
    pub fn merge(mut self, other: SceneCollection) -> Self {
        self.scenes.extend(other.scenes);
        self
    }

    /// Stable sort by acquisition time
    pub fn sort_by_time(&mut self) {
        self.scenes.sort_by_key(|s| s.acquired());
    }

    /// Fail unless every scene shares the first scene's grid; returns (rows, cols)
    pub fn validate_grid(&self) -> ChangeResult<(usize, usize)> {
        let first = self.scenes.first().ok_or_else(|| {
            ChangeError::EmptyCollection("cannot validate the grid of an empty collection".to_string())
        })?;
        for scene in &self.scenes[1..] {
            first.raster().check_same_grid(scene.raster()).map_err(|e| {
                log::error!("Scene '{}' is not on the collection grid: {}", scene.id(), e);
                e
            })?;
        }
        Ok(first.raster().dim())
    }

    pub fn summary(&self) -> CollectionSummary {
        let count_sensor =
            |kind: SensorKind| self.scenes.iter().filter(|s| s.sensor() == kind).count();

        CollectionSummary {
            scene_count: self.scenes.len(),
            legacy_count: count_sensor(SensorKind::Legacy),
            modern_count: count_sensor(SensorKind::Modern),
            first_acquired: self.scenes.iter().map(ScenePayload::acquired).min(),
            last_acquired: self.scenes.iter().map(ScenePayload::acquired).max(),
            first_scene_bands: self
                .scenes
                .first()
                .map(|s| s.raster().band_names().iter().map(|b| b.to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

impl IntoIterator for SceneCollection {
    type Item = ScenePayload;
    type IntoIter = std::vec::IntoIter<ScenePayload>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenes.into_iter()
    }
}

impl<'a> IntoIterator for &'a SceneCollection {
    type Item = &'a ScenePayload;
    type IntoIter = std::slice::Iter<'a, ScenePayload>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenes.iter()
    }
}

impl FromIterator<ScenePayload> for SceneCollection {
    fn from_iter<I: IntoIterator<Item = ScenePayload>>(iter: I) -> Self {
        Self {
            scenes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BandData, Raster};
    use chrono::TimeZone;

    fn scene(id: &str, sensor: SensorKind, year: i32, shape: (usize, usize)) -> ScenePayload {
        ScenePayload::new(
            id,
            sensor,
            Utc.with_ymd_and_hms(year, 7, 15, 18, 0, 0).unwrap(),
            Raster::from_band("B4", BandData::zeros(shape)),
        )
    }

    #[test]
    fn test_merge_and_sort() {
        let legacy = SceneCollection::from_scenes(vec![
            scene("LT05_1995", SensorKind::Legacy, 1995, (2, 2)),
            scene("LT05_1990", SensorKind::Legacy, 1990, (2, 2)),
        ]);
        let modern: SceneCollection =
            vec![scene("LC08_2018", SensorKind::Modern, 2018, (2, 2))].into_iter().collect();

        let mut merged = legacy.merge(modern);
        merged.sort_by_time();

        let ids: Vec<&str> = merged.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["LT05_1990", "LT05_1995", "LC08_2018"]);

        let summary = merged.summary();
        assert_eq!(summary.scene_count, 3);
        assert_eq!(summary.legacy_count, 2);
        assert_eq!(summary.modern_count, 1);
        assert_eq!(summary.first_scene_bands, vec!["B4".to_string()]);
        assert!(summary.to_string().contains("1990-07-15 to 2018-07-15"));
    }

    #[test]
    fn test_validate_grid() {
        let good = SceneCollection::from_scenes(vec![
            scene("a", SensorKind::Modern, 2018, (3, 4)),
            scene("b", SensorKind::Modern, 2019, (3, 4)),
        ]);
        assert_eq!(good.validate_grid().unwrap(), (3, 4));

        let bad = SceneCollection::from_scenes(vec![
            scene("a", SensorKind::Modern, 2018, (3, 4)),
            scene("b", SensorKind::Modern, 2019, (4, 3)),
        ]);
        assert!(matches!(bad.validate_grid(), Err(ChangeError::GridMismatch { .. })));

        assert!(matches!(
            SceneCollection::new().validate_grid(),
            Err(ChangeError::EmptyCollection(_))
        ));
    }
}
