//! Restricts the codecs offered in `m=video` sections to an allow-list.
//!
//! The rewrite is a single forward pass over the SDP lines. A video section is
//! opened by its `m=video` line and buffered until its first `a=ssrc` line or
//! the next `m=` line:
//! - `a=rtpmap` lines decide which payload types survive (codec name match)
//! - `a=fmtp` / `a=rtcp-fb` lines follow the fate of their payload type
//! - every other line of the section is kept, in order, behind the new m-line
//!
//! Payload type ids are never renumbered and keep their discovery order.
//! Lines outside an open video section are copied verbatim.

/// Classification of one SDP line during filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `m=video ...`
    MediaHeader,
    /// Any other `m=` line, closes an open video section
    OtherMediaHeader,
    /// `a=rtpmap:<pt> <codec>/<clock>...`
    Rtpmap,
    /// `a=fmtp:<pt> ...` or `a=rtcp-fb:<pt> ...`
    PayloadAttribute,
    /// `a=ssrc...`, closes the buffered part of a video section
    SectionTrailer,
    /// Anything else
    Other,
}

impl LineKind {
    pub fn classify(line: &str) -> Self {
        if line.starts_with("m=video") {
            LineKind::MediaHeader
        } else if line.starts_with("m=") {
            LineKind::OtherMediaHeader
        } else if line.starts_with("a=rtpmap") {
            LineKind::Rtpmap
        } else if line.starts_with("a=rtcp-fb") || line.starts_with("a=fmtp") {
            LineKind::PayloadAttribute
        } else if line.starts_with("a=ssrc") {
            LineKind::SectionTrailer
        } else {
            LineKind::Other
        }
    }
}

const RTPMAP_PREFIX: &str = "a=rtpmap:";

/// Payload type and codec name of an `a=rtpmap` line
fn parse_rtpmap(content: &str) -> Option<(&str, &str)> {
    let rest = content.get(RTPMAP_PREFIX.len()..)?;
    let (pt, encoding) = rest.split_once(' ')?;
    let codec = encoding.split('/').next().unwrap_or(encoding);
    Some((pt, codec))
}

/// Payload type of an `a=fmtp` / `a=rtcp-fb` line
fn payload_attribute_id(content: &str) -> Option<&str> {
    let (_, rest) = content.split_once(':')?;
    Some(rest.split(' ').next().unwrap_or(rest))
}

/// Split a raw line (as produced by `split_inclusive('\n')`) into its content
/// and its terminator.
fn split_terminator(line: &str) -> (&str, &str) {
    let content = line.trim_end_matches(['\r', '\n']);
    (content, &line[content.len()..])
}

/// A video section held back until its codec list is final
struct VideoSection<'a> {
    header: &'a str,
    allowed_ids: Vec<&'a str>,
    preamble: Vec<&'a str>,
    attributes: Vec<&'a str>,
}

impl<'a> VideoSection<'a> {
    fn open(header: &'a str) -> Self {
        Self {
            header,
            allowed_ids: Vec::new(),
            preamble: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Emit the rewritten m-line followed by the buffered lines.
    fn flush(self, out: &mut String) {
        let (content, terminator) = split_terminator(self.header);

        // media, port and protocol: everything before the third space
        let prefix = match content.match_indices(' ').nth(2) {
            Some((idx, _)) => &content[..idx],
            None => content,
        };

        out.push_str(prefix);
        for id in &self.allowed_ids {
            out.push(' ');
            out.push_str(id);
        }
        out.push_str(terminator);

        for line in self.preamble.into_iter().chain(self.attributes) {
            out.push_str(line);
        }
    }
}

/// Rewrite `sdp` so that every `m=video` section only offers the codecs named
/// in `allowed_codecs` (case-sensitive match on the rtpmap encoding name,
/// e.g. `"H264"`, `"rtx"`).
///
/// A video section that reaches the next `m=` line or the end of input
/// without an `a=ssrc` line is flushed as if that line had been seen.
pub fn force_codecs<S: AsRef<str>>(sdp: &str, allowed_codecs: &[S]) -> String {
    let is_allowed = |codec: &str| allowed_codecs.iter().any(|c| c.as_ref() == codec);

    let mut out = String::with_capacity(sdp.len());
    let mut section: Option<VideoSection<'_>> = None;

    for line in sdp.split_inclusive('\n') {
        let (content, _) = split_terminator(line);
        let kind = LineKind::classify(content);

        if kind == LineKind::MediaHeader {
            // a section that never reached its trailer is flushed as-is
            if let Some(previous) = section.take() {
                previous.flush(&mut out);
            }
            section = Some(VideoSection::open(line));
            continue;
        }

        if kind == LineKind::OtherMediaHeader {
            if let Some(previous) = section.take() {
                previous.flush(&mut out);
            }
            out.push_str(line);
            continue;
        }

        let Some(open) = section.as_mut() else {
            out.push_str(line);
            continue;
        };

        match kind {
            LineKind::Rtpmap => {
                if let Some((pt, codec)) = parse_rtpmap(content) {
                    if is_allowed(codec) {
                        if !open.allowed_ids.contains(&pt) {
                            open.allowed_ids.push(pt);
                        }
                        open.attributes.push(line);
                    }
                }
            }
            LineKind::PayloadAttribute => {
                if let Some(pt) = payload_attribute_id(content) {
                    if open.allowed_ids.contains(&pt) {
                        open.attributes.push(line);
                    }
                }
            }
            LineKind::SectionTrailer => {
                if let Some(done) = section.take() {
                    done.flush(&mut out);
                }
                out.push_str(line);
            }
            LineKind::Other | LineKind::MediaHeader | LineKind::OtherMediaHeader => {
                open.preamble.push(line)
            }
        }
    }

    if let Some(open) = section.take() {
        open.flush(&mut out);
    }

    out
}
