use std::ops::Range;

/// The name of the encoder's parameter segment.
pub const ENCODER_SEGMENT: &str = "encoder";

/// The name of the parameter segment of the decoder for `domain`.
pub fn decoder_segment(domain: usize) -> String {
    format!("decoder.{domain}")
}

/// A named contiguous range of the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub range: Range<usize>,
}

/// How the flat parameter buffer of an autoencoder is split: the encoder first, then each
/// decoder in domain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    segments: Vec<Segment>,
}

impl ParamLayout {
    pub fn new(encoder_size: usize, decoder_size: usize, num_domains: usize) -> Self {
        let encoder = Segment {
            name: ENCODER_SEGMENT.to_string(),
            range: 0..encoder_size,
        };

        let decoders = (0..num_domains).map(|domain| {
            let start = encoder_size + domain * decoder_size;
            Segment {
                name: decoder_segment(domain),
                range: start..start + decoder_size,
            }
        });

        Self {
            segments: std::iter::once(encoder).chain(decoders).collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The range of the segment called `name`, if any.
    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.segments
            .iter()
            .find(|segment| segment.name == name)
            .map(|segment| segment.range.clone())
    }

    /// The total amount of parameters.
    pub fn size(&self) -> usize {
        self.segments.last().map_or(0, |segment| segment.range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_contiguous() {
        let layout = ParamLayout::new(10, 4, 3);

        let names: Vec<_> = layout.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["encoder", "decoder.0", "decoder.1", "decoder.2"]);
        assert_eq!(layout.range("decoder.1"), Some(14..18));
        assert_eq!(layout.range("decoder.3"), None);
        assert_eq!(layout.size(), 22);
    }
}
