use image::{imageops, imageops::FilterType, DynamicImage, RgbaImage};

/// Scale the color channels of every pixel by `factor`, leaving alpha as is.
///
/// The factor is clamped into `[0, 1]`; channels are rounded to nearest.
pub fn darken(img: &mut RgbaImage, factor: f64) {
    let f = factor.clamp(0.0, 1.0);
    for px in img.pixels_mut() {
        for c in &mut px.0[..3] {
            *c = (*c as f64 * f).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blend `foreground` over `background` in place using the foreground alpha
/// as the paste mask. Every channel, alpha included, is interpolated:
/// `out = (fg * a + bg * (255 - a)) / 255`.
///
/// Both images must have the same dimensions.
pub fn paste_with_alpha(background: &mut RgbaImage, foreground: &RgbaImage) {
    debug_assert_eq!(background.dimensions(), foreground.dimensions());
    for (bg, fg) in background.pixels_mut().zip(foreground.pixels()) {
        let a = fg.0[3] as u32;
        for i in 0..4 {
            let mixed = fg.0[i] as u32 * a + bg.0[i] as u32 * (255 - a);
            bg.0[i] = ((mixed + 127) / 255) as u8;
        }
    }
}

/// Resize `background` to the foreground size, optionally darken it, and
/// paste the foreground over it.
///
/// The caller checks that the foreground carries an alpha channel.
pub fn composite(
    foreground: &DynamicImage,
    background: &DynamicImage,
    darken_factor: Option<f64>,
) -> RgbaImage {
    let fg = foreground.to_rgba8();
    let (w, h) = fg.dimensions();
    let mut out = imageops::resize(&background.to_rgba8(), w, h, FilterType::CatmullRom);
    if let Some(f) = darken_factor {
        darken(&mut out, f);
    }
    paste_with_alpha(&mut out, &fg);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn darken_rounds_and_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([200, 101, 3, 77]));
        darken(&mut img, 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [100, 51, 2, 77]);
    }

    #[test]
    fn darken_clamps_factor() {
        let mut img = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));
        darken(&mut img, 1.7);
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30, 255]);
        darken(&mut img, -0.3);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn paste_respects_mask_extremes_and_mixes_in_between() {
        let mut bg = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 255]));
        let mut fg = RgbaImage::new(3, 1);
        fg.put_pixel(0, 0, Rgba([200, 100, 50, 255]));
        fg.put_pixel(1, 0, Rgba([200, 100, 50, 0]));
        fg.put_pixel(2, 0, Rgba([200, 100, 50, 128]));
        paste_with_alpha(&mut bg, &fg);
        assert_eq!(bg.get_pixel(0, 0).0, [200, 100, 50, 255]);
        assert_eq!(bg.get_pixel(1, 0).0, [0, 0, 0, 255]);
        // 200 * 128 / 255 = 100.39
        assert_eq!(bg.get_pixel(2, 0).0[0], 100);
    }

    #[test]
    fn output_takes_foreground_size() {
        let fg = DynamicImage::ImageRgba8(RgbaImage::new(64, 48));
        let bg = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([9, 9, 9, 255])));
        let out = composite(&fg, &bg, Some(0.5));
        assert_eq!(out.dimensions(), (64, 48));
    }
}
