#![allow(dead_code)]

use std::path::Path;

use image::{ImageBuffer, Rgb};

/// Write `count` PNG images of `size`x`size` into `root/class_name`.
///
/// Pixels mix a class-specific base color with position and index, so
/// images differ from each other and classes are separable.
pub fn write_class(root: &Path, class_name: &str, count: usize, base: [u8; 3], size: u32) {
    let dir = root.join(class_name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let img = ImageBuffer::from_fn(size, size, |x, y| {
            let jitter = ((x * 7 + y * 3 + i as u32 * 11) % 32) as u8;
            Rgb([
                base[0].saturating_add(jitter),
                base[1].saturating_add(jitter / 2),
                base[2].saturating_add(jitter / 4),
            ])
        });
        img.save(dir.join(format!("img_{i:03}.png"))).unwrap();
    }
}

pub const NORMAL_COLOR: [u8; 3] = [200, 160, 140];
pub const NOMA_COLOR: [u8; 3] = [60, 30, 20];
