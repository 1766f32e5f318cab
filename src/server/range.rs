//! Single `Range: bytes=...` header resolution

/// How a request's `Range` header maps onto a file of known size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range: serve the whole file with `200`
    Full,
    /// Serve the inclusive byte span `start..=end` with `206`
    Partial {
        /// First byte offset
        start: u64,
        /// Last byte offset, inclusive
        end: u64,
    },
    /// Well-formed range lying entirely past the end: `416`
    Unsatisfiable,
}

impl RangeOutcome {
    /// Offset and length of the bytes to send for a file of `total` bytes
    pub fn span(&self, total: u64) -> Option<(u64, u64)> {
        match *self {
            RangeOutcome::Full => Some((0, total)),
            RangeOutcome::Partial { start, end } => Some((start, end - start + 1)),
            RangeOutcome::Unsatisfiable => None,
        }
    }
}

/// Resolve an optional `Range` header against a file of `total` bytes
///
/// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. Headers in another unit,
/// with several ranges, or that do not parse are ignored and the whole file
/// is served. The end of a range is clamped to the file.
pub fn resolve_range(header: Option<&str>, total: u64) -> RangeOutcome {
    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix range: the final n bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || total == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: total.saturating_sub(suffix),
            end: total - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeOutcome::Full,
        }
    };

    if start >= total {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial {
        start,
        end: end.map_or(total - 1, |end| end.min(total - 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_supported_forms() {
        let cases = [
            (None, RangeOutcome::Full),
            (Some("bytes=0-99"), RangeOutcome::Partial { start: 0, end: 99 }),
            (Some("bytes=10-19"), RangeOutcome::Partial { start: 10, end: 19 }),
            (Some("bytes=990-"), RangeOutcome::Partial { start: 990, end: 999 }),
            (Some("bytes=-100"), RangeOutcome::Partial { start: 900, end: 999 }),
            (Some("bytes=500-5000"), RangeOutcome::Partial { start: 500, end: 999 }),
            (Some("bytes=-5000"), RangeOutcome::Partial { start: 0, end: 999 }),
            (Some("bytes=999-999"), RangeOutcome::Partial { start: 999, end: 999 }),
        ];
        for (header, expected) in cases {
            assert_eq!(resolve_range(header, 1000), expected, "header {header:?}");
        }
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(resolve_range(Some("bytes=1000-"), 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=1000-1200"), 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=-0"), 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=0-"), 0), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=-10"), 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn unusable_headers_fall_back_to_full() {
        for header in [
            "items=0-10",
            "bytes=0-1,5-6",
            "bytes=abc",
            "bytes=5-2",
            "bytes=x-10",
            "bytes=-",
        ] {
            assert_eq!(resolve_range(Some(header), 1000), RangeOutcome::Full, "{header}");
        }
    }

    #[test]
    fn span_lengths() {
        assert_eq!(RangeOutcome::Full.span(1000), Some((0, 1000)));
        assert_eq!(
            RangeOutcome::Partial { start: 10, end: 19 }.span(1000),
            Some((10, 10))
        );
        assert_eq!(RangeOutcome::Unsatisfiable.span(1000), None);
    }
}
