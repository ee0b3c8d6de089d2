/// Splits model output into visible text and reasoning text by tracking
/// `<think>`/`</think>` markers across an incremental token stream (spec
/// §4.1: "content between `<think>` and `</think>` markers is routed to a
/// separate reasoning stream... but is retained verbatim for collection").
///
/// The splitter is fed one text chunk at a time (as chunks arrive from the
/// backend) and returns the portion of each chunk that belongs to the
/// visible stream versus the reasoning stream. Markers may straddle chunk
/// boundaries, so a small amount of unresolved text is buffered internally.
pub struct ThinkTagSplitter {
    in_think: bool,
    buf: String,
}

#[derive(Debug, Default, Clone)]
pub struct SplitResult {
    pub visible: String,
    pub reasoning: String,
}

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self {
            in_think: false,
            buf: String::new(),
        }
    }

    /// Feed the next chunk of raw model output, returning the resolved
    /// visible/reasoning text. Any trailing partial marker is held back
    /// until the next call or `flush`.
    pub fn push(&mut self, chunk: &str) -> SplitResult {
        self.buf.push_str(chunk);
        self.drain(false)
    }

    /// Called once the stream ends — flushes any remaining buffered text
    /// as-is (an unterminated `<think>` at EOS degrades to visible text
    /// rather than silently dropping it).
    pub fn flush(&mut self) -> SplitResult {
        self.drain(true)
    }

    fn drain(&mut self, at_eos: bool) -> SplitResult {
        let mut out = SplitResult::default();
        loop {
            let marker = if self.in_think { CLOSE } else { OPEN };
            match self.buf.find(marker) {
                Some(idx) => {
                    let (before, after) = self.buf.split_at(idx);
                    let before = before.to_string();
                    let rest = after[marker.len()..].to_string();
                    if self.in_think {
                        out.reasoning.push_str(&before);
                    } else {
                        out.visible.push_str(&before);
                    }
                    self.in_think = !self.in_think;
                    self.buf = rest;
                }
                None => {
                    // Keep enough tail buffered to catch a marker split
                    // across chunks; emit everything else now.
                    let keep = marker.len().saturating_sub(1);
                    if at_eos || self.buf.len() <= keep {
                        if at_eos {
                            if self.in_think {
                                out.reasoning.push_str(&self.buf);
                            } else {
                                out.visible.push_str(&self.buf);
                            }
                            self.buf.clear();
                        }
                        break;
                    }
                    let split_at = self.buf.len() - keep;
                    let (emit, keep_tail) = self.buf.split_at(split_at);
                    let emit = emit.to_string();
                    let keep_tail = keep_tail.to_string();
                    if self.in_think {
                        out.reasoning.push_str(&emit);
                    } else {
                        out.visible.push_str(&emit);
                    }
                    self.buf = keep_tail;
                    break;
                }
            }
        }
        out
    }
}

impl Default for ThinkTagSplitter {
    fn default() -> Self {
        Self::new()
    }
}
