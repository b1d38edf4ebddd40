use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Coord, Line, LineString, MultiPolygon, Polygon, Simplify};
use imageproc::geometry::arc_length;
use tracing::{debug, warn};

use crate::contour::Contour;

/// Douglas-Peucker tolerance as a fraction of the contour perimeter.
pub const SIMPLIFY_TOLERANCE_RATIO: f64 = 0.005;

/// Minimum vertex count of a usable ring.
pub const MIN_POLYGON_VERTICES: usize = 3;

const COORD_EPSILON: f64 = 1e-9;
const AREA_EPSILON: f64 = 1e-9;

/// Repaired geometry of one contour.
///
/// Repair may split a self-intersecting outline into several disjoint rings,
/// so callers must not assume a single polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Polygon<f64>),
    PolygonSet(MultiPolygon<f64>),
}

impl Geometry {
    /// The constituent rings, in repair order.
    pub fn parts(&self) -> Vec<&Polygon<f64>> {
        match self {
            Geometry::Polygon(polygon) => vec![polygon],
            Geometry::PolygonSet(set) => set.0.iter().collect(),
        }
    }

    pub fn part_count(&self) -> usize {
        match self {
            Geometry::Polygon(_) => 1,
            Geometry::PolygonSet(set) => set.0.len(),
        }
    }
}

/// A simplified contour: the vertex list exposed to clients and the repaired
/// geometry used for intersection tests, derived from the same point set.
///
/// When repair splits the ring, `points` keeps the unrepaired outline while
/// `geometry` holds the repaired rings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedPolygon {
    pub points: Vec<[i32; 2]>,
    pub geometry: Geometry,
}

/// Reduces a contour to a small vertex count and repairs its topology.
///
/// Returns `None` when fewer than three vertices survive simplification or
/// when no valid ring can be recovered; either way the contour is dropped.
pub fn simplify_contour(contour: &Contour) -> Option<SimplifiedPolygon> {
    if contour.len() < MIN_POLYGON_VERTICES {
        return None;
    }

    let epsilon = SIMPLIFY_TOLERANCE_RATIO * arc_length(&contour.points, true);
    let mut ring = contour
        .points
        .iter()
        .map(|p| Coord {
            x: p.x as f64,
            y: p.y as f64,
        })
        .collect::<Vec<_>>();
    ring.push(ring[0]);

    let simplified = LineString::new(ring).simplify(&epsilon);
    let mut vertices = simplified.0;
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    if vertices.len() < MIN_POLYGON_VERTICES {
        debug!(
            vertices = vertices.len(),
            "contour collapsed during simplification"
        );
        return None;
    }

    let geometry = if is_simple_ring(&vertices) {
        Geometry::Polygon(polygon_from(&vertices))
    } else {
        match repair_ring(&vertices) {
            Some(geometry) => geometry,
            None => {
                warn!(
                    vertices = vertices.len(),
                    "dropping polygon that could not be repaired"
                );
                return None;
            }
        }
    };

    let points = vertices
        .iter()
        .map(|c| [c.x.round() as i32, c.y.round() as i32])
        .collect();

    Some(SimplifiedPolygon { points, geometry })
}

/// Checks that an open ring (no closing duplicate) is a simple polygon with
/// non-zero area.
pub fn is_simple_ring(vertices: &[Coord<f64>]) -> bool {
    let n = vertices.len();
    if n < MIN_POLYGON_VERTICES {
        return false;
    }
    let edges = ring_edges(vertices);
    if edges.iter().any(|e| same_coord(e.start, e.end)) {
        return false;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                // Neighbouring edges meet at their shared vertex; anything else
                // is a crossing or a touch.
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return false,
            }
        }
    }

    polygon_from(vertices).unsigned_area() > AREA_EPSILON
}

/// Splits a self-intersecting ring into valid simple rings.
///
/// Every crossing or touching point is inserted into both edges involved, then
/// the ring is walked and each loop closed by revisiting a vertex is cut out as
/// its own ring. Degenerate loops (spikes, zero-area slivers) are discarded.
pub fn repair_ring(vertices: &[Coord<f64>]) -> Option<Geometry> {
    let noded = node_ring(&dedup_ring(vertices));

    let mut rings: Vec<Vec<Coord<f64>>> = Vec::new();
    let mut stack: Vec<Coord<f64>> = Vec::with_capacity(noded.len());
    for coord in noded {
        match stack.iter().position(|c| same_coord(*c, coord)) {
            Some(start) => {
                let ring = stack.split_off(start + 1);
                let mut closed = vec![stack[start]];
                closed.extend(ring);
                rings.push(closed);
            }
            None => stack.push(coord),
        }
    }
    rings.push(stack);

    let valid = rings
        .into_iter()
        .map(|ring| dedup_ring(&ring))
        .filter(|ring| is_simple_ring(ring))
        .map(|ring| polygon_from(&ring))
        .collect::<Vec<_>>();

    debug!(rings = valid.len(), "repaired self-intersecting polygon");
    match valid.len() {
        0 => None,
        1 => valid.into_iter().next().map(Geometry::Polygon),
        _ => Some(Geometry::PolygonSet(MultiPolygon::new(valid))),
    }
}

fn polygon_from(vertices: &[Coord<f64>]) -> Polygon<f64> {
    Polygon::new(LineString::new(vertices.to_vec()), vec![])
}

fn ring_edges(vertices: &[Coord<f64>]) -> Vec<Line<f64>> {
    let n = vertices.len();
    (0..n)
        .map(|i| Line::new(vertices[i], vertices[(i + 1) % n]))
        .collect()
}

fn same_coord(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= COORD_EPSILON && (a.y - b.y).abs() <= COORD_EPSILON
}

/// Removes consecutive duplicates, including a duplicate closing vertex.
fn dedup_ring(vertices: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(vertices.len());
    for &coord in vertices {
        if ring.last().map_or(true, |last| !same_coord(*last, coord)) {
            ring.push(coord);
        }
    }
    while ring.len() > 1 && same_coord(ring[0], ring[ring.len() - 1]) {
        ring.pop();
    }
    ring
}

/// Inserts every edge-edge intersection point into the ring as a vertex.
///
/// Each pair of edges is intersected once and the resulting coordinate is
/// shared by both edges, so the walk in `repair_ring` sees bit-identical
/// vertices at every crossing.
fn node_ring(vertices: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let n = vertices.len();
    if n < 2 {
        return vertices.to_vec();
    }
    let edges = ring_edges(vertices);
    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];

    for i in 0..n {
        for j in (i + 1)..n {
            let found = match line_intersection(edges[i], edges[j]) {
                None => continue,
                Some(LineIntersection::SinglePoint { intersection, .. }) => vec![intersection],
                Some(LineIntersection::Collinear { intersection }) => {
                    vec![intersection.start, intersection.end]
                }
            };
            for coord in found {
                for k in [i, j] {
                    let edge = edges[k];
                    if !same_coord(coord, edge.start) && !same_coord(coord, edge.end) {
                        splits[k].push(coord);
                    }
                }
            }
        }
    }

    let mut noded = Vec::with_capacity(n * 2);
    for (k, edge) in edges.iter().enumerate() {
        noded.push(edge.start);
        let mut inner = std::mem::take(&mut splits[k]);
        inner.sort_by(|a, b| {
            squared_distance(edge.start, *a).total_cmp(&squared_distance(edge.start, *b))
        });
        inner.dedup_by(|a, b| same_coord(*a, *b));
        noded.extend(inner);
    }
    dedup_ring(&noded)
}

fn squared_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let (dx, dy) = (a.x - b.x, a.y - b.y);
    dx * dx + dy * dy
}
