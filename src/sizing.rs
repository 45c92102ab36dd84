//! Columns and figure containers of a grid, and how they follow grid height.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::capabilities::Capabilities;
use crate::figure::{Figure, FigureSize};
use crate::metrics::Metrics;

/// A text column.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub height: f32,
    pub min_height: f32,
    /// Shrink headroom relative to the grid height, never negative.
    pub delta: f32,
    pub flexible: bool,
}

impl Column {
    pub fn new(metrics: &Metrics, grid_height: f32) -> Self {
        let height = metrics.outer_height;
        Self {
            height,
            min_height: metrics.min_height,
            delta: (grid_height - height).max(0.0),
            flexible: metrics.flexible,
        }
    }

    /// Follow a new grid height, keeping `delta`.
    pub fn stretch(&mut self, grid_height: f32) -> &mut Self {
        if self.flexible {
            self.height = (grid_height - self.delta).max(0.0);
        }
        self
    }
}

/// A region that holds one figure payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub height: f32,
    pub min_height: f32,
    pub delta: f32,
    pub flexible: bool,
    /// Accepted size names in preference order.
    pub sizes: Vec<String>,
    /// Anchored to the bottom of the page instead of the top.
    pub anchored_bottom: bool,
    /// Index of the first grid column following this container; columns
    /// from there on give up the height a flexible payload takes.
    pub first_following_column: usize,
}

impl Container {
    pub fn new(metrics: &Metrics, grid_height: f32, sizes: Vec<String>) -> Self {
        let height = metrics.outer_height;
        Self {
            height,
            min_height: metrics.min_height,
            delta: (grid_height - height).max(0.0),
            flexible: metrics.flexible,
            sizes,
            anchored_bottom: false,
            first_following_column: 0,
        }
    }

    pub fn stretch(&mut self, grid_height: f32) -> &mut Self {
        if self.flexible {
            self.height = (grid_height - self.delta).max(0.0);
        }
        self
    }

    /// First size of `figure`, in this container's order, that the host
    /// supports and that fits.
    ///
    /// Fixed containers are trusted to only name sizes that fit; flexible
    /// containers check the payload height.
    pub fn select_size<'f>(
        &self,
        figure: &'f Figure,
        caps: &dyn Capabilities,
    ) -> Option<(&str, &'f FigureSize)> {
        self.sizes.iter().find_map(|name| {
            let size = figure.size(name)?;
            if !size.meets_requirements(caps) {
                return None;
            }
            if self.flexible && size.payload_height() > self.height {
                return None;
            }
            Some((name.as_str(), size))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AllCapabilities, CapabilitySet};
    use crate::snapshot::ContentNode;

    fn fixed(height: f32) -> Metrics {
        Metrics {
            flexible: false,
            ..Metrics::sized(100.0, height)
        }
    }

    #[test]
    fn fixed_stretch_never_changes_height() {
        let mut col = Column::new(&fixed(300.0), 400.0);
        assert_eq!(col.delta, 100.0);
        col.stretch(800.0);
        assert_eq!(col.height, 300.0);
    }

    #[test]
    fn flexible_stretch_preserves_delta() {
        let mut col = Column::new(&Metrics::sized(100.0, 300.0), 400.0);
        col.stretch(600.0);
        assert_eq!(col.height, 500.0);
        col.stretch(50.0);
        assert_eq!(col.height, 0.0);
        col.stretch(400.0);
        assert_eq!(col.height, 300.0);
    }

    #[test]
    fn delta_is_never_negative() {
        let col = Column::new(&Metrics::sized(100.0, 500.0), 400.0);
        assert_eq!(col.delta, 0.0);
        let container = Container::new(&Metrics::sized(100.0, 500.0), 400.0, Vec::new());
        assert_eq!(container.delta, 0.0);
    }

    #[test]
    fn select_size_follows_container_order() {
        let figure = Figure::new(0, 0)
            .with_size("small", FigureSize::new("s", 0.0, 100.0))
            .with_size("big", FigureSize::new("b", 0.0, 300.0));
        let container = Container::new(
            &Metrics::sized(100.0, 200.0),
            400.0,
            alloc::vec!["big".into(), "small".into()],
        );
        let (name, _) = container
            .select_size(&figure, &AllCapabilities)
            .expect("small fits");
        assert_eq!(name, "small");

        let mut tall = container.clone();
        tall.height = 400.0;
        assert_eq!(tall.select_size(&figure, &AllCapabilities).map(|s| s.0), Some("big"));
    }

    #[test]
    fn select_size_skips_unsupported_and_declines() {
        let figure = Figure::new(0, 0).with_size(
            "video",
            FigureSize::new("v", 0.0, 0.0).with_requirements(alloc::vec!["video".into()]),
        );
        let container = Container::new(&fixed(200.0), 200.0, alloc::vec!["video".into()]);
        assert!(container.select_size(&figure, &CapabilitySet::new()).is_none());
        assert!(container.select_size(&figure, &AllCapabilities).is_some());
    }

    #[test]
    fn select_size_measures_payload_box() {
        let img = ContentNode::element("img").with_metrics(Metrics::sized(100.0, 300.0));
        let figure = Figure::new(0, 0).with_size(
            "big",
            FigureSize {
                node: Some(img),
                ..FigureSize::new("<img/>", 0.0, 0.0)
            },
        );
        let sizes = alloc::vec!["big".into()];
        let short = Container::new(&Metrics::sized(100.0, 200.0), 400.0, sizes.clone());
        assert!(short.select_size(&figure, &AllCapabilities).is_none());
        let tall = Container::new(&Metrics::sized(100.0, 300.0), 400.0, sizes);
        assert!(tall.select_size(&figure, &AllCapabilities).is_some());
    }
}
