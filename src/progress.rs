use std::{
    io::{self, Write},
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use regex::Regex;

use crate::error::LoadError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProgressPrinter {
    prefix: String,
    suffix: String,
    interval: Duration,
    length: Option<usize>,
    show_rate: bool,
}

impl ProgressPrinter {
    /// `template` may hold one `{}` or `{name}` placeholder for the count;
    /// without one the count is put in front.
    pub fn new(template: &str) -> Result<Self, LoadError> {
        let placeholder = Regex::new(r"\{[A-Za-z_0-9]*\}")
            .map_err(|e| LoadError::Configuration(e.to_string()))?;
        let found = placeholder.find_iter(template).collect::<Vec<_>>();
        let (prefix, suffix) = match found.as_slice() {
            [] => (String::new(), format!(" {template}")),
            [one] => (
                template[..one.start()].to_string(),
                template[one.end()..].to_string(),
            ),
            many => {
                let names = many.iter().map(|m| m.as_str()).collect::<Vec<_>>();
                return Err(LoadError::Configuration(format!(
                    "too many format fields in progress template: {}",
                    names.join(", ")
                )));
            }
        };
        Ok(Self {
            prefix,
            suffix,
            interval: DEFAULT_INTERVAL,
            length: None,
            show_rate: true,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Expected total, enabling percentage and remaining-time estimates.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn without_rate(mut self) -> Self {
        self.show_rate = false;
        self
    }

    pub fn render(&self, count: usize) -> String {
        format!("{}{count}{}", self.prefix, self.suffix)
    }

    /// Spawns the printing thread. `terminal` rewrites one line in place
    /// instead of printing a line per tick.
    pub fn start<W>(&self, writer: W, terminal: bool) -> ProgressHandle<W>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let printer = self.clone();
        let thread = thread::spawn(move || -> io::Result<W> {
            let mut out = Output {
                writer,
                terminal,
                max_width: 0,
            };
            let started = Instant::now();
            let mut current = 0usize;
            let mut at_previous_tick = 0usize;
            let mut next_tick = started + printer.interval;
            loop {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(Message::Progress(n)) => current = n,
                    Ok(Message::Finish) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if current != at_previous_tick {
                            let line = printer.tick_line(current, at_previous_tick, started.elapsed());
                            out.print(&line, false)?;
                            at_previous_tick = current;
                        }
                        next_tick += printer.interval;
                    }
                }
            }
            let total = started.elapsed().as_secs_f64();
            let avg = if total > 0.0 { current as f64 / total } else { 0.0 };
            let line = format!("{} (total: {total:.1}s avg: {avg:.1}/s)", printer.render(current));
            out.print(&line, true)?;
            Ok(out.writer)
        });
        ProgressHandle { sender, thread }
    }

    fn tick_line(&self, current: usize, previous: usize, elapsed: Duration) -> String {
        let mut line = self.render(current);
        if !self.show_rate {
            return line;
        }
        let rate = (current - previous) as f64 / self.interval.as_secs_f64();
        match self.length.filter(|len| *len > 0) {
            Some(length) if current > 0 => {
                let frac = current as f64 / length as f64;
                let spent = elapsed.as_secs_f64();
                let remain = spent / frac - spent;
                line.push_str(&format!(
                    " ({:.0}% rate:{rate:.0}/s remaining:{remain:.0}s)",
                    frac * 100.0
                ));
            }
            _ => line.push_str(&format!(" ({rate:.0}/s)")),
        }
        line
    }
}

enum Message {
    Progress(usize),
    Finish,
}

struct Output<W> {
    writer: W,
    terminal: bool,
    max_width: usize,
}

impl<W: Write> Output<W> {
    fn print(&mut self, text: &str, last: bool) -> io::Result<()> {
        self.max_width = self.max_width.max(text.chars().count());
        if self.terminal {
            write!(self.writer, "\r{text:<width$}", width = self.max_width)?;
            if last {
                writeln!(self.writer)?;
            }
        } else {
            writeln!(self.writer, "{text}")?;
        }
        self.writer.flush()
    }
}

pub struct ProgressHandle<W> {
    sender: Sender<Message>,
    thread: JoinHandle<io::Result<W>>,
}

impl<W> ProgressHandle<W> {
    pub fn update(&mut self, count: usize) {
        // A send only fails once the printer is gone; progress is best effort.
        let _ = self.sender.send(Message::Progress(count));
    }

    /// Stops the printer and hands the writer back.
    pub fn finish(self) -> io::Result<W> {
        let _ = self.sender.send(Message::Finish);
        self.thread
            .join()
            .map_err(|_| io::Error::other("progress printer thread panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_accept_at_most_one_placeholder() {
        let named = ProgressPrinter::new("{progress} rows loaded").expect("named");
        assert_eq!(named.render(7), "7 rows loaded");
        let anon = ProgressPrinter::new("line {}").expect("anon");
        assert_eq!(anon.render(3), "line 3");
        let bare = ProgressPrinter::new("rows").expect("bare");
        assert_eq!(bare.render(2), "2 rows");
        let err = ProgressPrinter::new("{a} of {b}").unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn tick_line_estimates_when_length_known() {
        let printer = ProgressPrinter::new("{}")
            .expect("printer")
            .with_length(100);
        let line = printer.tick_line(50, 0, Duration::from_secs(10));
        assert_eq!(line, "50 (50% rate:50/s remaining:10s)");
        let plain = ProgressPrinter::new("{}").expect("printer");
        assert_eq!(plain.tick_line(5, 2, Duration::from_secs(1)), "5 (3/s)");
    }

    #[test]
    fn finish_prints_totals_and_returns_writer() {
        let printer = ProgressPrinter::new("{} rows")
            .expect("printer")
            .with_interval(Duration::from_millis(5));
        let mut handle = printer.start(Vec::new(), false);
        for count in 1..=10 {
            handle.update(count);
        }
        thread::sleep(Duration::from_millis(30));
        let out = String::from_utf8(handle.finish().expect("finish")).expect("utf8");
        let last = out.lines().last().expect("final line");
        assert!(last.starts_with("10 rows (total: "), "{out}");
        assert!(last.contains("avg:"));
    }

    #[test]
    fn terminal_output_rewrites_in_place() {
        let printer = ProgressPrinter::new("{}").expect("printer");
        let handle = printer.start(Vec::new(), true);
        let out = String::from_utf8(handle.finish().expect("finish")).expect("utf8");
        assert!(out.starts_with('\r'));
        assert!(out.ends_with('\n'));
    }
}
