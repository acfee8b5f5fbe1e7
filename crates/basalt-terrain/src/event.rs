//! Terrain change notifications for out-of-core collaborators

/// Events the terrain manager publishes at well-defined points of the
/// per-frame sequence. Scenery systems (vegetation, ocean, boundaries,
/// decals) drain these to recompute placement and visibility without the
/// core depending on their types.
#[derive(Clone, Debug, PartialEq)]
pub enum TerrainEvent {
    /// The camera location fed to `update_camera`
    CameraLocation { x_mm: i64, z_mm: i64 },
    /// The page array shifted by this page delta
    PageShifted { dx: i64, dz: i64 },
    /// A page entered the resident window at this page coordinate
    PageVisible { page_x: i64, page_z: i64 },
    /// A page left the resident window
    PageHidden { page_x: i64, page_z: i64 },
    /// Height data changed inside this world-space square (mm origin,
    /// meters extent); cached heights there were regenerated
    TerrainChanged { x_mm: i64, z_mm: i64, size_m: i64 },
}

/// A simple event queue that the manager pushes to and consumers drain
pub struct EventBus {
    events: Vec<TerrainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Push an event onto the bus
    pub fn push(&mut self, event: TerrainEvent) {
        self.events.push(event);
    }

    /// Drain all events from the bus, returning them
    pub fn drain(&mut self) -> Vec<TerrainEvent> {
        std::mem::take(&mut self.events)
    }

    /// Check if there are pending events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let mut bus = EventBus::new();
        assert!(bus.is_empty());

        bus.push(TerrainEvent::PageShifted { dx: 1, dz: 0 });
        bus.push(TerrainEvent::PageVisible {
            page_x: 3,
            page_z: -1,
        });

        assert_eq!(bus.len(), 2);
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_drain_clears() {
        let mut bus = EventBus::new();
        bus.push(TerrainEvent::CameraLocation { x_mm: 0, z_mm: 0 });

        let _ = bus.drain();
        assert!(bus.drain().is_empty());
    }
}
