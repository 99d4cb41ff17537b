use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image and run metadata for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunContext {
    /// File name template, `?` characters stand for the zero-padded image index.
    pub image_template: String,
    pub image_dir: PathBuf,
    /// Degrees per frame.
    pub osc_range: f64,
    /// Seconds per frame.
    pub exposure_time: f64,
    /// Beam center in mm.
    pub beam_x: f64,
    pub beam_y: f64,
    pub pixel_size: f64,
    pub distance: f64,
    pub wavelength: f64,
    #[serde(default)]
    pub twotheta: Option<f64>,
    pub first_image: u32,
    pub total: u32,
    #[serde(default)]
    pub end_frame: Option<u32>,
}

impl RunContext {
    pub fn validate(&self) -> Result<(), String> {
        if !self.image_template.contains('?') {
            return Err(format!(
                "image template has no index placeholder: {}",
                self.image_template
            ));
        }
        if self.osc_range <= 0.0 {
            return Err(format!("oscillation range must be positive: {}", self.osc_range));
        }
        if self.exposure_time < 0.0 {
            return Err(format!(
                "exposure time must not be negative: {}",
                self.exposure_time
            ));
        }
        if self.pixel_size <= 0.0 {
            return Err(format!("pixel size must be positive: {}", self.pixel_size));
        }
        if self.total == 0 {
            return Err("run has no images".to_string());
        }
        if let Some(end) = self.end_frame {
            if end < self.first_image {
                return Err(format!(
                    "end frame {end} precedes first image {}",
                    self.first_image
                ));
            }
        }
        Ok(())
    }

    /// Last image the run is expected to produce.
    pub fn final_image(&self) -> u32 {
        self.end_frame
            .unwrap_or(self.first_image + self.total.saturating_sub(1))
    }

    pub fn image_name(&self, index: u32) -> String {
        format_image_name(&self.image_template, index)
    }

    pub fn image_path(&self, index: u32) -> PathBuf {
        self.image_dir.join(self.image_name(index))
    }

    /// Full template path handed to XDS as `NAME_TEMPLATE_OF_DATA_FRAMES`.
    pub fn template_path(&self) -> PathBuf {
        self.image_dir.join(&self.image_template)
    }

    /// Template text up to the index placeholder, without trailing separators.
    pub fn image_prefix(&self) -> String {
        let head = self
            .image_template
            .split('?')
            .next()
            .unwrap_or(&self.image_template);
        let trimmed = head.trim_end_matches(['_', '.', '-']);
        if trimmed.is_empty() {
            "data".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Number of frames covering `degrees` of rotation, at least one.
    pub fn frames_for_degrees(&self, degrees: f64) -> u32 {
        let frames = (degrees / self.osc_range + 1e-6).floor();
        if frames < 1.0 {
            1
        } else {
            frames as u32
        }
    }

    /// Shrinks the run to the images that were actually collected.
    pub fn truncate_to(&mut self, last: u32) {
        self.total = last.saturating_sub(self.first_image) + 1;
        self.end_frame = Some(last);
    }
}

/// Replaces the first run of `?` in `template` with `index` zero-padded to the
/// run's width. Any further `?` characters are dropped.
pub fn format_image_name(template: &str, index: u32) -> String {
    let Some(start) = template.find('?') else {
        return template.to_string();
    };
    let width = template[start..]
        .chars()
        .take_while(|ch| *ch == '?')
        .count();
    let rest = template[start + width..].replace('?', "");
    format!("{}{index:0width$}{rest}", &template[..start])
}

/// Highest index `n >= first` such that every image `first..=n` exists.
pub fn last_present(context: &RunContext, first: u32) -> Option<u32> {
    last_present_in(&context.image_dir, &context.image_template, first)
}

pub(crate) fn last_present_in(dir: &Path, template: &str, first: u32) -> Option<u32> {
    let mut last = None;
    let mut index = first;
    while dir.join(format_image_name(template, index)).is_file() {
        last = Some(index);
        index += 1;
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_context(dir: &Path) -> RunContext {
        RunContext {
            image_template: "thaum_1_????.cbf".to_string(),
            image_dir: dir.to_path_buf(),
            osc_range: 0.5,
            exposure_time: 0.2,
            beam_x: 150.0,
            beam_y: 160.0,
            pixel_size: 0.172,
            distance: 300.0,
            wavelength: 0.97918,
            twotheta: None,
            first_image: 1,
            total: 360,
            end_frame: None,
        }
    }

    #[test]
    fn image_name_pads_to_placeholder_width() {
        assert_eq!(format_image_name("x_????.img", 7), "x_0007.img");
        assert_eq!(format_image_name("x_???.img", 1234), "x_1234.img");
        assert_eq!(format_image_name("x_??_??.img", 5), "x_05_.img");
    }

    #[test]
    fn final_image_prefers_end_frame_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut context = sample_context(temp.path());
        assert_eq!(context.final_image(), 360);
        context.end_frame = Some(100);
        assert_eq!(context.final_image(), 100);
    }

    #[test]
    fn frames_for_degrees_floors_and_clamps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut context = sample_context(temp.path());
        assert_eq!(context.frames_for_degrees(10.0), 20);
        context.osc_range = 0.3;
        assert_eq!(context.frames_for_degrees(10.0), 33);
        context.osc_range = 20.0;
        assert_eq!(context.frames_for_degrees(10.0), 1);
    }

    #[test]
    fn last_present_stops_at_first_gap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = sample_context(temp.path());
        for index in [1, 2, 3, 5] {
            fs::write(context.image_path(index), b"img").expect("write image");
        }
        assert_eq!(last_present(&context, 1), Some(3));
        assert_eq!(last_present(&context, 4), None);
        assert_eq!(last_present(&context, 5), Some(5));
    }

    #[test]
    fn prefix_and_truncate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut context = sample_context(temp.path());
        assert_eq!(context.image_prefix(), "thaum_1");
        context.truncate_to(40);
        assert_eq!(context.total, 40);
        assert_eq!(context.final_image(), 40);
        assert!(context.validate().is_ok());
    }
}
