use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::mask::{ClassLabel, LabelMask};

/// Contours with fewer points than this are noise.
pub const MIN_CONTOUR_POINTS: usize = 3;

// Border added around each lattice image so foreground never touches the
// edge of the buffer handed to the tracer.
const LATTICE_PAD: u32 = 1;

/// Closed boundary of one connected region, in pixel-edge coordinates.
///
/// Pixel `(x, y)` covers the square `[x, x + 1] x [y, y + 1]`, so two regions
/// whose pixels are adjacent share boundary points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
}

impl Contour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Extracts the external contours of every region of `label` in `mask`.
///
/// Regions are 8-connected groups of pixels; each is traced on its own, so
/// regions separated by a single background pixel stay separate. Holes are
/// not tracked and regions nested inside a hole of another region are
/// skipped. The result follows the region labelling order, so it is
/// deterministic for a given mask.
pub fn extract_contours(mask: &LabelMask, label: ClassLabel) -> Vec<Contour> {
    let (width, height) = mask.dimensions();
    let id = label.id();
    let binary = GrayImage::from_fn(width, height, |x, y| {
        Luma([if mask.get(x, y).id() == id { u8::MAX } else { 0 }])
    });
    let regions = connected_components(&binary, Connectivity::Eight, Luma([0u8]));
    let outside = outside_background(&binary);

    let mut boxes: Vec<Option<RegionBox>> = Vec::new();
    for (x, y, Luma([region])) in regions.enumerate_pixels() {
        if *region == 0 {
            continue;
        }
        let index = *region as usize - 1;
        if boxes.len() <= index {
            boxes.resize(index + 1, None);
        }
        let open = touches_outside(&outside, x, y);
        let entry = boxes[index].get_or_insert(RegionBox::new(x, y));
        entry.include(x, y);
        entry.exposed |= open;
    }

    let contours = boxes
        .iter()
        .enumerate()
        .filter_map(|(index, region)| region.map(|r| (index as u32 + 1, r)))
        .filter(|(_, region)| region.exposed)
        .filter_map(|(region_id, region)| trace_region(&regions, region_id, &region))
        .filter(|c| c.len() >= MIN_CONTOUR_POINTS)
        .collect::<Vec<_>>();

    debug!(label = %label, count = contours.len(), "extracted contours");
    contours
}

/// Pixel bounds of one region, inclusive, and whether it borders the
/// background connected to the image edge.
#[derive(Debug, Clone, Copy)]
struct RegionBox {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    exposed: bool,
}

impl RegionBox {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            exposed: false,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// Marks background reachable from the image edge through 4-connected
/// background pixels, in a frame padded by one pixel on every side.
fn outside_background(binary: &GrayImage) -> GrayImage {
    let (width, height) = binary.dimensions();
    let inverted = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let inside = (1..=width).contains(&x) && (1..=height).contains(&y);
        if inside && binary.get_pixel(x - 1, y - 1)[0] != 0 {
            Luma([0])
        } else {
            Luma([u8::MAX])
        }
    });
    let background = connected_components(&inverted, Connectivity::Four, Luma([0u8]));
    let edge = background.get_pixel(0, 0)[0];
    GrayImage::from_fn(width + 2, height + 2, |x, y| {
        Luma([if background.get_pixel(x, y)[0] == edge { u8::MAX } else { 0 }])
    })
}

/// Whether mask pixel `(x, y)` has a 4-neighbour in the outside background.
fn touches_outside(outside: &GrayImage, x: u32, y: u32) -> bool {
    let (px, py) = (x + 1, y + 1);
    [(px - 1, py), (px + 1, py), (px, py - 1), (px, py + 1)]
        .into_iter()
        .any(|(nx, ny)| outside.get_pixel(nx, ny)[0] != 0)
}

/// Traces one region on the corner lattice of its bounding box.
///
/// Corner `(i, j)` is the top-left corner of pixel `(i, j)`. Tracing corners
/// instead of pixel centres yields outlines that enclose whole pixels.
fn trace_region(
    regions: &ImageBuffer<Luma<u32>, Vec<u32>>,
    region_id: u32,
    region: &RegionBox,
) -> Option<Contour> {
    let width = region.max_x - region.min_x + 1;
    let height = region.max_y - region.min_y + 1;
    let mut lattice = GrayImage::new(width + 1 + 2 * LATTICE_PAD, height + 1 + 2 * LATTICE_PAD);

    for y in region.min_y..=region.max_y {
        for x in region.min_x..=region.max_x {
            if regions.get_pixel(x, y)[0] != region_id {
                continue;
            }
            let (lx, ly) = (x - region.min_x + LATTICE_PAD, y - region.min_y + LATTICE_PAD);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                lattice.put_pixel(lx + dx, ly + dy, Luma([u8::MAX]));
            }
        }
    }

    let dx = region.min_x as i32 - LATTICE_PAD as i32;
    let dy = region.min_y as i32 - LATTICE_PAD as i32;
    find_contours::<i32>(&lattice)
        .into_iter()
        .find(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| Contour {
            points: c
                .points
                .into_iter()
                .map(|p| Point::new(p.x + dx, p.y + dy))
                .collect(),
        })
}
