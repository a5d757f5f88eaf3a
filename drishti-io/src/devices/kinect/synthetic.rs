//! Synthetic Kinect for hardware-free runs
//!
//! Produces a scrolling test pattern in every mode so the whole pipeline
//! (capture loop, encoding, servers) can be exercised without a sensor.
//!
//! | Mode  | Pattern |
//! |-------|---------|
//! | RGB   | Diagonal color bars scrolling right |
//! | IR    | Horizontal gray gradient scrolling down |
//! | Depth | Radial ramp from the frame center, pulsing |

use super::KinectDevice;

/// Generated test-pattern device
pub struct SyntheticKinect {
    width: u32,
    height: u32,
    tick: u32,
}

impl SyntheticKinect {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    fn advance(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| (x, y)))
    }
}

impl KinectDevice for SyntheticKinect {
    fn get_rgb(&mut self) -> Option<Vec<u8>> {
        let t = self.advance();
        let bar = (self.width / 8).max(1);
        Some(
            self.pixels()
                .flat_map(|(x, y)| {
                    let band = ((x + y + t * 4) / bar) % 8;
                    [
                        if band & 1 != 0 { 255 } else { 0 },
                        if band & 2 != 0 { 255 } else { 0 },
                        if band & 4 != 0 { 255 } else { 0 },
                    ]
                })
                .collect(),
        )
    }

    fn get_ir(&mut self) -> Option<Vec<u8>> {
        let t = self.advance();
        let h = self.height.max(1);
        Some(
            self.pixels()
                .map(|(_, y)| (((y + t * 2) % h) * 255 / h) as u8)
                .collect(),
        )
    }

    fn get_depth(&mut self) -> Option<Vec<u16>> {
        let t = self.advance();
        let (cx, cy) = (self.width as i64 / 2, self.height as i64 / 2);
        let pulse = (t % 64) as i64 * 8;
        Some(
            self.pixels()
                .map(|(x, y)| {
                    let dx = x as i64 - cx;
                    let dy = y as i64 - cy;
                    let r = ((dx * dx + dy * dy) as f64).sqrt() as i64;
                    (r * 4 + pulse).clamp(0, 2047) as u16
                })
                .collect(),
        )
    }

    /// Patterns restart from the first frame
    fn stop(&mut self) {
        self.tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_sizes() {
        let mut dev = SyntheticKinect::new(16, 12);
        assert_eq!(dev.get_rgb().unwrap().len(), 16 * 12 * 3);
        assert_eq!(dev.get_ir().unwrap().len(), 16 * 12);
        let depth = dev.get_depth().unwrap();
        assert_eq!(depth.len(), 16 * 12);
        assert!(depth.iter().all(|&d| d <= 2047));
    }

    #[test]
    fn test_pattern_moves() {
        let mut dev = SyntheticKinect::new(32, 8);
        let a = dev.get_rgb().unwrap();
        let b = dev.get_rgb().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stop_rewinds_pattern() {
        let mut dev = SyntheticKinect::new(32, 8);
        let first = dev.get_rgb().unwrap();
        dev.get_rgb();
        dev.stop();
        assert_eq!(dev.get_rgb().unwrap(), first);
    }
}
