//! Page geometry and print decoration requested for a PDF render.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Largest margin accepted on any side, in inches.
const MAX_MARGIN_INCHES: f64 = 4.0;

/// Paper formats understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageFormat {
    #[default]
    A4,
    A3,
    A5,
    Letter,
    Legal,
}

impl PageFormat {
    /// Paper size as `(width, height)` in inches, portrait orientation.
    pub fn dimensions_in(self) -> (f64, f64) {
        match self {
            PageFormat::A4 => (8.27, 11.69),
            PageFormat::A3 => (11.69, 16.54),
            PageFormat::A5 => (5.83, 8.27),
            PageFormat::Letter => (8.5, 11.0),
            PageFormat::Legal => (8.5, 14.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageFormat::A4 => "A4",
            PageFormat::A3 => "A3",
            PageFormat::A5 => "A5",
            PageFormat::Letter => "Letter",
            PageFormat::Legal => "Legal",
        }
    }
}

impl FromStr for PageFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let format = match value.trim().to_ascii_lowercase().as_str() {
            "a4" => PageFormat::A4,
            "a3" => PageFormat::A3,
            "a5" => PageFormat::A5,
            "letter" => PageFormat::Letter,
            "legal" => PageFormat::Legal,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown page format `{other}`"
                )));
            }
        };
        Ok(format)
    }
}

/// Page margins in inches.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

/// Per-request print configuration.
///
/// Every variant behaviour of the conversion endpoint (header/footer decoration,
/// orientation, paper size) is expressed here rather than as a separate code path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrintOptions {
    pub display_header_footer: bool,
    pub page_format: PageFormat,
    pub margins: Margins,
    pub landscape: bool,
    pub print_background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            display_header_footer: false,
            page_format: PageFormat::A4,
            margins: Margins::default(),
            landscape: false,
            print_background: true,
            header_template: None,
            footer_template: None,
        }
    }
}

impl PrintOptions {
    /// Paper size as `(width, height)` in inches, honouring orientation.
    pub fn paper_size_in(&self) -> (f64, f64) {
        let (width, height) = self.page_format.dimensions_in();
        if self.landscape {
            (height, width)
        } else {
            (width, height)
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let Margins {
            top,
            right,
            bottom,
            left,
        } = self.margins;

        for (side, value) in [
            ("top", top),
            ("right", right),
            ("bottom", bottom),
            ("left", left),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DomainError::validation(format!(
                    "margin `{side}` must be a non-negative number"
                )));
            }
            if value > MAX_MARGIN_INCHES {
                return Err(DomainError::validation(format!(
                    "margin `{side}` exceeds {MAX_MARGIN_INCHES} inches"
                )));
            }
        }

        let (width, height) = self.paper_size_in();
        if left + right >= width || top + bottom >= height {
            return Err(DomainError::validation(
                "margins leave no printable area on the page",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_a4_with_backgrounds() {
        let options = PrintOptions::default();
        assert_eq!(options.page_format, PageFormat::A4);
        assert!(options.print_background);
        assert!(!options.display_header_footer);
        assert_eq!(options.paper_size_in(), (8.27, 11.69));
    }

    #[test]
    fn deserializes_camel_case_payload() {
        let options: PrintOptions = serde_json::from_str(
            r#"{"displayHeaderFooter":true,"pageFormat":"Letter","margins":{"top":0.5,"left":1}}"#,
        )
        .expect("valid options");

        assert!(options.display_header_footer);
        assert_eq!(options.page_format, PageFormat::Letter);
        assert_eq!(options.margins.top, 0.5);
        assert_eq!(options.margins.left, 1.0);
        assert_eq!(options.margins.bottom, 0.0);
        assert!(options.print_background);
    }

    #[test]
    fn landscape_swaps_dimensions() {
        let options = PrintOptions {
            landscape: true,
            ..Default::default()
        };
        assert_eq!(options.paper_size_in(), (11.69, 8.27));
    }

    #[test]
    fn rejects_negative_and_oversized_margins() {
        let negative = PrintOptions {
            margins: Margins {
                top: -1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let crowded = PrintOptions {
            page_format: PageFormat::A5,
            margins: Margins::uniform(3.0),
            ..Default::default()
        };
        assert!(crowded.validate().is_err());

        assert!(PrintOptions::default().validate().is_ok());
    }

    #[test]
    fn page_format_parses_case_insensitively() {
        assert_eq!("letter".parse::<PageFormat>(), Ok(PageFormat::Letter));
        assert_eq!(" A3 ".parse::<PageFormat>(), Ok(PageFormat::A3));
        assert!("tabloid".parse::<PageFormat>().is_err());
    }
}
