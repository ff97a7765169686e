//! Proximity index: a per-zone 3D grid answering "who is near entity X".
//! Cell edge equals the default nearby radius, so a query only scans the
//! 27-neighborhood around the probe cell.

use std::collections::BTreeMap;

use contracts::agent::Position;

type Cell = (i64, i64, i64);

#[derive(Debug, Clone)]
pub struct ProximityIndex {
    cell_edge: f64,
    positions: BTreeMap<String, Position>,
    // zone -> cell -> entity ids
    grid: BTreeMap<String, BTreeMap<Cell, Vec<String>>>,
}

impl ProximityIndex {
    pub fn new(cell_edge: f64) -> Self {
        Self {
            cell_edge: cell_edge.max(1.0),
            positions: BTreeMap::new(),
            grid: BTreeMap::new(),
        }
    }

    fn cell_of(&self, position: &Position) -> Cell {
        (
            (position.x / self.cell_edge).floor() as i64,
            (position.y / self.cell_edge).floor() as i64,
            (position.z / self.cell_edge).floor() as i64,
        )
    }

    /// Insert or move an entity. Entities without a reported location simply
    /// never appear here and are excluded from nearby queries.
    pub fn update(&mut self, entity_id: &str, position: Position) {
        self.remove(entity_id);
        let cell = self.cell_of(&position);
        self.grid
            .entry(position.zone.clone())
            .or_default()
            .entry(cell)
            .or_default()
            .push(entity_id.to_string());
        self.positions.insert(entity_id.to_string(), position);
    }

    pub fn remove(&mut self, entity_id: &str) {
        let Some(previous) = self.positions.remove(entity_id) else {
            return;
        };
        let cell = self.cell_of(&previous);
        if let Some(zone_grid) = self.grid.get_mut(&previous.zone) {
            if let Some(bucket) = zone_grid.get_mut(&cell) {
                bucket.retain(|id| id != entity_id);
                if bucket.is_empty() {
                    zone_grid.remove(&cell);
                }
            }
            if zone_grid.is_empty() {
                self.grid.remove(&previous.zone);
            }
        }
    }

    pub fn position_of(&self, entity_id: &str) -> Option<&Position> {
        self.positions.get(entity_id)
    }

    pub fn zone_of(&self, entity_id: &str) -> Option<&str> {
        self.positions.get(entity_id).map(|pos| pos.zone.as_str())
    }

    /// Entities within `radius` of the probe entity, same zone only, sorted
    /// nearest first. The probe itself is excluded.
    pub fn nearby(&self, entity_id: &str, radius: f64) -> Vec<(String, f64)> {
        let Some(origin) = self.positions.get(entity_id) else {
            return Vec::new();
        };
        let Some(zone_grid) = self.grid.get(&origin.zone) else {
            return Vec::new();
        };

        let center = self.cell_of(origin);
        let reach = (radius / self.cell_edge).ceil() as i64;
        let mut found = Vec::new();

        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let cell = (center.0 + dx, center.1 + dy, center.2 + dz);
                    let Some(bucket) = zone_grid.get(&cell) else {
                        continue;
                    };
                    for candidate in bucket {
                        if candidate == entity_id {
                            continue;
                        }
                        let Some(position) = self.positions.get(candidate) else {
                            continue;
                        };
                        let distance = distance(origin, position);
                        if distance <= radius {
                            found.push((candidate.clone(), distance));
                        }
                    }
                }
            }
        }

        found.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        found
    }

    /// All tracked entities in a zone.
    pub fn entities_in_zone(&self, zone: &str) -> Vec<String> {
        self.grid
            .get(zone)
            .map(|zone_grid| zone_grid.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tracked_count(&self) -> usize {
        self.positions.len()
    }
}

fn distance(a: &Position, b: &Position) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
}
