//! Connectome plots: nodes at parcel coordinates, edges for the strongest connections.
//!
//! Figures are rendered as SVG with three orthogonal glass-brain projections (sagittal, coronal
//! and axial), in the spirit of the usual connectome plots of neuroimaging toolkits.

use log::info;
use ndarray::Array2;
use palette::{Hsl, IntoColor, Srgb};

use std::fmt;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ConnectomeError, Result};
use crate::util::{percentile, slugify};

/// Extent of the MNI152 template in mm, used as the drawing area: (min, max) per axis.
const MNI_BOUNDS: [(f64, f64); 3] = [(-90., 90.), (-126., 90.), (-72., 108.)];
const PANEL_SIZE: f64 = 300.;
const TITLE_HEIGHT: f64 = 36.;
const FOOTER_HEIGHT: f64 = 24.;
const NODE_RADIUS: f64 = 4.;

/// How to pick the edges that are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeThreshold {
    /// Keep edges whose absolute weight is at least this percentile (0 to 100) of all absolute edge weights.
    Percentile(f64),
    /// Keep edges whose absolute weight is at least this value.
    Absolute(f64),
}

impl EdgeThreshold {
    /// Parse a threshold given as a percentile like `"80%"` or as an absolute value like `"0.5"`.
    pub fn parse(text: &str) -> Result<EdgeThreshold> {
        text.parse()
    }

    /// Compute the absolute weight threshold for the given connectivity matrix.
    ///
    /// Percentiles are computed over the strict lower triangle, so each edge is counted once and self-connections are ignored.
    pub fn value_for(&self, matrix: &Array2<f64>) -> Result<f64> {
        match *self {
            EdgeThreshold::Absolute(v) => Ok(v.abs()),
            EdgeThreshold::Percentile(q) => {
                let weights = lower_triangle_abs(matrix);
                if weights.is_empty() {
                    return Ok(0.);
                }
                percentile(&weights, q)
            }
        }
    }
}

impl FromStr for EdgeThreshold {
    type Err = ConnectomeError;

    /// Parse `"80%"` as a percentile and `"0.5"` as an absolute threshold.
    fn from_str(text: &str) -> Result<EdgeThreshold> {
        let trimmed = text.trim();
        let invalid = || ConnectomeError::InvalidThreshold(text.to_string());
        if let Some(number) = trimmed.strip_suffix('%') {
            let q: f64 = number.trim().parse().map_err(|_| invalid())?;
            if !(0.0..=100.0).contains(&q) {
                return Err(invalid());
            }
            Ok(EdgeThreshold::Percentile(q))
        } else {
            let v: f64 = trimmed.parse().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            Ok(EdgeThreshold::Absolute(v))
        }
    }
}

impl fmt::Display for EdgeThreshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EdgeThreshold::Percentile(q) => write!(f, "{}%", q),
            EdgeThreshold::Absolute(v) => write!(f, "{}", v),
        }
    }
}

fn lower_triangle_abs(matrix: &Array2<f64>) -> Vec<f64> {
    let n = matrix.nrows();
    let mut weights = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in 0..i {
            weights.push(matrix[[i, j]].abs());
        }
    }
    weights
}


/// An edge between the nodes `from` and `to`, with `from > to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
}

/// Keep the edges of a symmetric connectivity matrix whose absolute weight reaches `threshold`.
///
/// Zero-weight edges are never kept. The result is sorted by increasing absolute weight.
pub fn threshold_edges(matrix: &Array2<f64>, threshold: f64) -> Vec<Edge> {
    let n = matrix.nrows();
    let mut edges: Vec<Edge> = Vec::new();
    for i in 0..n {
        for j in 0..i {
            let w = matrix[[i, j]];
            if w != 0. && w.abs() >= threshold {
                edges.push(Edge { from: i, to: j, weight: w });
            }
        }
    }
    edges.sort_by(|a, b| a.weight.abs().partial_cmp(&b.weight.abs()).unwrap_or(std::cmp::Ordering::Equal));
    edges
}


/// A connectome plot: titled, with one node per parcel and the thresholded edges.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectomeFigure {
    pub title: String,
    pub nodes: Vec<[f64; 3]>,
    pub edges: Vec<Edge>,
    /// The absolute weight threshold that was applied.
    pub threshold: f64,
    /// The largest absolute off-diagonal weight, the end of the colour scale.
    pub vmax: f64,
}

impl ConnectomeFigure {

    /// Build a figure from a (nodes, nodes) connectivity matrix and one world coordinate per node.
    ///
    /// Fails if the matrix is not square and symmetric, or if the number of coordinates does not match.
    pub fn new(title: &str, matrix: &Array2<f64>, coords: &[[f64; 3]], threshold: &EdgeThreshold) -> Result<ConnectomeFigure> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(ConnectomeError::ShapeMismatch(format!("connectivity matrix must be square, got {:?}", matrix.shape())));
        }
        if coords.len() != n {
            return Err(ConnectomeError::ShapeMismatch(format!(
                "connectivity matrix has {} nodes, but {} coordinates were given",
                n,
                coords.len()
            )));
        }
        for i in 0..n {
            for j in 0..i {
                if (matrix[[i, j]] - matrix[[j, i]]).abs() > 1e-8 {
                    return Err(ConnectomeError::ShapeMismatch(String::from("connectivity matrix must be symmetric")));
                }
            }
        }

        let threshold = threshold.value_for(matrix)?;
        let edges = threshold_edges(matrix, threshold);
        let vmax = lower_triangle_abs(matrix).into_iter().fold(0., f64::max);
        Ok(ConnectomeFigure { title: title.to_string(), nodes: coords.to_vec(), edges, threshold, vmax })
    }

    /// Render the figure as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let width = 3. * PANEL_SIZE;
        let height = TITLE_HEIGHT + PANEL_SIZE + FOOTER_HEIGHT;
        let mut svg = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(svg, r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#, width, height, width, height);
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="18" text-anchor="middle">{}</text>"#,
            width / 2.,
            TITLE_HEIGHT * 0.7,
            escape_xml(&self.title)
        );

        let node_colors = node_palette(self.nodes.len());
        for (panel, view) in View::ALL.iter().enumerate() {
            let x0 = panel as f64 * PANEL_SIZE;
            let proj = Projection::new(*view, x0, TITLE_HEIGHT);
            let (cx, cy) = proj.to_pixel(&[0., 0., 0.], true);
            let (rx, ry) = proj.half_extent();
            let _ = writeln!(
                svg,
                r##"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="#f4f4f4" stroke="#bbbbbb"/>"##,
                cx, cy, rx, ry
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="12" fill="gray">{}</text>"#,
                x0 + 8.,
                TITLE_HEIGHT + 14.,
                view.letter()
            );
            for edge in self.edges.iter() {
                let (x1, y1) = proj.to_pixel(&self.nodes[edge.from], false);
                let (x2, y2) = proj.to_pixel(&self.nodes[edge.to], false);
                let _ = writeln!(
                    svg,
                    r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="1.5"/>"#,
                    x1, y1, x2, y2, edge_color(edge.weight, self.vmax)
                );
            }
            for (node, color) in self.nodes.iter().zip(node_colors.iter()) {
                let (x, y) = proj.to_pixel(node, false);
                let _ = writeln!(
                    svg,
                    r#"<circle cx="{:.1}" cy="{:.1}" r="{}" fill="{}" stroke="black" stroke-width="0.5"/>"#,
                    x, y, NODE_RADIUS, color
                );
            }
        }

        let _ = writeln!(
            svg,
            r#"<text x="8" y="{:.1}" font-family="sans-serif" font-size="11" fill="gray">{} nodes, {} edges with |r| &gt;= {:.3}, colour scale ±{:.3}</text>"#,
            height - 8.,
            self.nodes.len(),
            self.edges.len(),
            self.threshold,
            self.vmax
        );
        svg.push_str("</svg>\n");
        svg
    }
}

impl fmt::Display for ConnectomeFigure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Connectome '{}' with {} nodes and {} edges.", self.title, self.nodes.len(), self.edges.len())
    }
}


/// Collects figures until they are all shown together.
#[derive(Debug, Clone, Default)]
pub struct FigureQueue {
    figures: Vec<ConnectomeFigure>,
}

impl FigureQueue {
    pub fn new() -> FigureQueue {
        FigureQueue::default()
    }

    pub fn push(&mut self, figure: ConnectomeFigure) {
        self.figures.push(figure);
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn figures(&self) -> &[ConnectomeFigure] {
        &self.figures
    }

    /// Write all queued figures to `dir` as SVG files, in queue order, and empty the queue.
    ///
    /// Returns the paths of the written files.
    pub fn show<P: AsRef<Path>>(&mut self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut paths = Vec::with_capacity(self.figures.len());
        for (idx, figure) in self.figures.drain(..).enumerate() {
            let path = dir.join(format!("{:02}_{}.svg", idx + 1, slugify(&figure.title)));
            fs::write(&path, figure.to_svg())?;
            info!("{} Written to '{}'.", figure, path.display());
            paths.push(path);
        }
        Ok(paths)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Sagittal,
    Coronal,
    Axial,
}

impl View {
    const ALL: [View; 3] = [View::Sagittal, View::Coronal, View::Axial];

    /// The world axes shown horizontally and vertically.
    fn axes(&self) -> (usize, usize) {
        match self {
            View::Sagittal => (1, 2),
            View::Coronal => (0, 2),
            View::Axial => (0, 1),
        }
    }

    fn letter(&self) -> &'static str {
        match self {
            View::Sagittal => "x",
            View::Coronal => "y",
            View::Axial => "z",
        }
    }
}

/// Maps world coordinates into one panel of the figure.
struct Projection {
    h_axis: usize,
    v_axis: usize,
    scale: f64,
    center_px: (f64, f64),
    center_world: (f64, f64),
}

impl Projection {
    fn new(view: View, x0: f64, y0: f64) -> Projection {
        let (h_axis, v_axis) = view.axes();
        let (h_min, h_max) = MNI_BOUNDS[h_axis];
        let (v_min, v_max) = MNI_BOUNDS[v_axis];
        let usable = PANEL_SIZE - 20.;
        let scale = (usable / (h_max - h_min)).min(usable / (v_max - v_min));
        Projection {
            h_axis,
            v_axis,
            scale,
            center_px: (x0 + PANEL_SIZE / 2., y0 + PANEL_SIZE / 2.),
            center_world: ((h_min + h_max) / 2., (v_min + v_max) / 2.),
        }
    }

    /// Pixel position of a world coordinate. With `snap_to_center`, the panel centre is returned.
    fn to_pixel(&self, xyz: &[f64; 3], snap_to_center: bool) -> (f64, f64) {
        if snap_to_center {
            return self.center_px;
        }
        let h = (xyz[self.h_axis] - self.center_world.0) * self.scale;
        let v = (xyz[self.v_axis] - self.center_world.1) * self.scale;
        (self.center_px.0 + h, self.center_px.1 - v)
    }

    fn half_extent(&self) -> (f64, f64) {
        let (h_min, h_max) = MNI_BOUNDS[self.h_axis];
        let (v_min, v_max) = MNI_BOUNDS[self.v_axis];
        ((h_max - h_min) / 2. * self.scale * 0.95, (v_max - v_min) / 2. * self.scale * 0.95)
    }
}

/// Generates `n` visually distinct node colours using evenly spaced hues.
fn node_palette(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n.max(1) as f32) * 360.0;
            hsl_to_hex(Hsl::new(hue, 0.75, 0.55))
        })
        .collect()
}

/// Diverging colour scale: blue for negative, red for positive weights, more saturated when stronger.
fn edge_color(weight: f64, vmax: f64) -> String {
    let strength = if vmax > 0. { (weight.abs() / vmax).min(1.) } else { 1. } as f32;
    let hue = if weight < 0. { 230.0 } else { 0.0 };
    let lightness = 0.9 - 0.5 * strength;
    hsl_to_hex(Hsl::new(hue, 0.85, lightness))
}

fn hsl_to_hex(hsl: Hsl) -> String {
    let rgb: Srgb = hsl.into_color();
    format!(
        "#{:02x}{:02x}{:02x}",
        (rgb.red.max(0.).min(1.) * 255.0).round() as u8,
        (rgb.green.max(0.).min(1.) * 255.0).round() as u8,
        (rgb.blue.max(0.).min(1.) * 255.0).round() as u8
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn demo_matrix() -> Array2<f64> {
        array![
            [1.0, 0.1, -0.9, 0.3, 0.0],
            [0.1, 1.0, 0.5, -0.2, 0.6],
            [-0.9, 0.5, 1.0, 0.4, 0.05],
            [0.3, -0.2, 0.4, 1.0, 0.7],
            [0.0, 0.6, 0.05, 0.7, 1.0]
        ]
    }

    fn demo_coords(n: usize) -> Vec<[f64; 3]> {
        (0..n).map(|i| [i as f64 * 10. - 20., 5., -3. * i as f64]).collect()
    }

    #[test]
    fn thresholds_are_parsed() {
        assert_eq!(EdgeThreshold::Percentile(80.), "80%".parse().unwrap());
        assert_eq!(EdgeThreshold::Percentile(99.5), " 99.5 % ".parse().unwrap());
        assert_eq!(EdgeThreshold::Absolute(0.25), "0.25".parse().unwrap());
        assert!("180%".parse::<EdgeThreshold>().is_err());
        assert!("strong".parse::<EdgeThreshold>().is_err());
    }

    #[test]
    fn the_80_percent_threshold_keeps_the_strongest_fifth_of_edges() {
        let m = demo_matrix();
        let fig = ConnectomeFigure::new("demo", &m, &demo_coords(5), &EdgeThreshold::Percentile(80.)).unwrap();
        // 10 edges: sorted |w| = 0, .05, .1, .2, .3, .4, .5, .6, .7, .9. The 80th percentile is 0.62.
        assert!((fig.threshold - 0.62).abs() < 1e-12);
        assert_eq!(2, fig.edges.len());
        let weights: Vec<f64> = fig.edges.iter().map(|e| e.weight).collect();
        assert_eq!(vec![0.7, -0.9], weights);
        assert_eq!(0.9, fig.vmax);
        for e in fig.edges.iter() {
            assert!(e.from > e.to);
        }
    }

    #[test]
    fn absolute_thresholds_drop_zero_edges() {
        let edges = threshold_edges(&demo_matrix(), 0.0);
        assert_eq!(9, edges.len());
    }

    #[test]
    fn coordinates_must_match_the_matrix() {
        let res = ConnectomeFigure::new("demo", &demo_matrix(), &demo_coords(4), &EdgeThreshold::Percentile(80.));
        assert!(matches!(res, Err(ConnectomeError::ShapeMismatch(_))));

        let mut asym = demo_matrix();
        asym[[0, 1]] = 0.8;
        let res = ConnectomeFigure::new("demo", &asym, &demo_coords(5), &EdgeThreshold::Percentile(80.));
        assert!(res.is_err());
    }

    #[test]
    fn the_svg_contains_title_nodes_and_edges() {
        let fig = ConnectomeFigure::new("Yeo <17>", &demo_matrix(), &demo_coords(5), &EdgeThreshold::Percentile(80.)).unwrap();
        let svg = fig.to_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Yeo &lt;17&gt;"));
        assert_eq!(3 * 5, svg.matches("<circle").count());
        assert_eq!(3 * 2, svg.matches("<line").count());
    }

    #[test]
    fn queued_figures_are_written_in_order() {
        let dir = tempdir().unwrap();
        let mut queue = FigureQueue::new();
        for title in ["B atlas", "A atlas"].iter() {
            queue.push(ConnectomeFigure::new(title, &demo_matrix(), &demo_coords(5), &EdgeThreshold::Percentile(80.)).unwrap());
        }
        assert_eq!(2, queue.len());
        let paths = queue.show(dir.path().join("figures")).unwrap();
        assert!(queue.is_empty());
        assert_eq!(2, paths.len());
        assert!(paths[0].ends_with("01_b_atlas.svg"));
        assert!(paths[1].ends_with("02_a_atlas.svg"));
        assert!(fs::read_to_string(&paths[1]).unwrap().contains("A atlas"));
    }

    #[test]
    fn edge_colors_encode_the_sign() {
        assert_ne!(edge_color(0.5, 1.0), edge_color(-0.5, 1.0));
        assert_eq!(edge_color(1.0, 1.0), edge_color(2.0, 1.0));
    }
}
