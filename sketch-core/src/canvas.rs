use sketch_types::{Point, Rgb, StrokeShape};

pub const DEFAULT_CANVAS_WIDTH: u32 = 800;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 600;
/// Erasers paint the background at this multiple of the chosen width.
pub const ERASER_WIDTH_FACTOR: f32 = 1.5;

/// RGB bitmap that strokes are rasterised onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    background: Rgb,
    pixels: Vec<Rgb>,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_background(width, height, Rgb::WHITE)
    }

    pub fn with_background(width: u32, height: u32, background: Rgb) -> Self {
        Self {
            width,
            height,
            background,
            pixels: vec![background; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    pub fn clear(&mut self) {
        self.pixels.fill(self.background);
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| *p == self.background)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        self.index(x as i64, y as i64).map(|i| self.pixels[i])
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some((y as usize) * (self.width as usize) + x as usize)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Renders one completed stroke.
    pub fn draw_shape(&mut self, shape: &StrokeShape) {
        match shape {
            StrokeShape::Brush {
                points,
                color,
                width,
            } => self.draw_polyline(points, *color, *width),
            StrokeShape::Eraser { points, width } => {
                self.draw_polyline(points, self.background, width * ERASER_WIDTH_FACTOR)
            }
            StrokeShape::Fill { at, color } => {
                if at.is_finite() && at.x >= 0.0 && at.y >= 0.0 {
                    self.flood_fill(at.x as u32, at.y as u32, *color);
                }
            }
        }
    }

    pub fn draw_polyline(&mut self, points: &[Point], color: Rgb, width: f32) {
        match points {
            [] => {}
            [only] => self.draw_segment(*only, *only, color, width),
            _ => {
                for pair in points.windows(2) {
                    self.draw_segment(pair[0], pair[1], color, width);
                }
            }
        }
    }

    /// Thick line with round caps. Only pixels inside the segment's
    /// bounding box, clipped to the raster, are visited, so the cost is
    /// bounded by the raster size whatever the coordinates.
    pub fn draw_segment(&mut self, from: Point, to: Point, color: Rgb, width: f32) {
        if !from.is_finite() || !to.is_finite() || !width.is_finite() {
            return;
        }
        let radius = (width / 2.0).max(0.5);
        let Some((min_x, max_x)) = clip_span(from.x, to.x, radius, self.width) else {
            return;
        };
        let Some((min_y, max_y)) = clip_span(from.y, to.y, radius, self.height) else {
            return;
        };

        // f64 keeps far-away endpoints from swamping the pixel offsets.
        let (fx, fy) = (f64::from(from.x), f64::from(from.y));
        let (dx, dy) = (f64::from(to.x) - fx, f64::from(to.y) - fy);
        let length2 = dx * dx + dy * dy;
        let r2 = f64::from(radius) * f64::from(radius);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                let t = if length2 > 0.0 {
                    (((px - fx) * dx + (py - fy) * dy) / length2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let (ox, oy) = (fx + dx * t - px, fy + dy * t - py);
                if ox * ox + oy * oy <= r2 {
                    self.put(x, y, color);
                }
            }
        }
    }

    /// Replaces the 4-connected region of the colour found at `(x, y)`.
    /// Uses an explicit work stack so region size never affects call depth.
    pub fn flood_fill(&mut self, x: u32, y: u32, replacement: Rgb) {
        let Some(start) = self.index(x as i64, y as i64) else {
            return;
        };
        let target = self.pixels[start];
        if target == replacement {
            return;
        }

        self.pixels[start] = replacement;
        let mut stack = vec![(x as i64, y as i64)];
        while let Some((cx, cy)) = stack.pop() {
            for (nx, ny) in [(cx + 1, cy), (cx - 1, cy), (cx, cy + 1), (cx, cy - 1)] {
                if let Some(i) = self.index(nx, ny) {
                    if self.pixels[i] == target {
                        self.pixels[i] = replacement;
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }

    /// Binary PPM (P6) encoding.
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.reserve(self.pixels.len() * 3);
        for pixel in &self.pixels {
            out.extend_from_slice(&[pixel.r, pixel.g, pixel.b]);
        }
        out
    }
}

/// Pixel range covered by `[a, b]` widened by `radius`, clipped to
/// `0..extent`. `None` when it misses the raster entirely.
fn clip_span(a: f32, b: f32, radius: f32, extent: u32) -> Option<(i64, i64)> {
    if extent == 0 {
        return None;
    }
    let low = (a.min(b) - radius).floor().max(0.0);
    let high = (a.max(b) + radius).ceil().min(extent as f32 - 1.0);
    if low > high {
        return None;
    }
    Some((low as i64, high as i64))
}
