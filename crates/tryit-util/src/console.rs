use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
    sync::Mutex,
};

/// Operator-facing terminal. Prompts and status go to stdout; answers are
/// whitespace-delimited tokens read from stdin.
pub trait Console: Send + Sync {
    fn say(&self, line: &str);

    /// Emits one progress dot without a newline.
    fn progress(&self);

    /// Terminates a run of progress dots.
    fn end_progress(&self);

    /// Prints `question` and returns the next answer token.
    fn prompt(&self, question: &str) -> io::Result<String>;
}

/// Asks a yes/no question. Only a literal `y` (any case) counts as yes.
pub fn ask_yes(console: &dyn Console, question: &str) -> io::Result<bool> {
    let answer = console.prompt(question)?;
    Ok(answer.to_ascii_lowercase() == "y")
}

#[derive(Default)]
pub struct StdConsole {
    pending: Mutex<VecDeque<String>>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&self) -> io::Result<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(token) = pending.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "standard input closed while waiting for an answer",
                ));
            }
            pending.extend(line.split_whitespace().map(str::to_string));
        }
    }
}

impl Console for StdConsole {
    fn say(&self, line: &str) {
        println!("{line}");
    }

    fn progress(&self) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(b".");
        let _ = out.flush();
    }

    fn end_progress(&self) {
        println!();
    }

    fn prompt(&self, question: &str) -> io::Result<String> {
        {
            let mut out = io::stdout().lock();
            writeln!(out, "{question}")?;
            out.flush()?;
        }
        self.next_token()
    }
}

/// Console that replays a fixed list of answers and records everything shown.
///
/// Used for non-interactive runs and in tests. Running out of answers is an
/// `UnexpectedEof` error, same as a closed stdin.
#[derive(Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
    dots: Mutex<usize>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
            dots: Mutex::new(0),
        }
    }

    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn prompts_seen(&self) -> usize {
        self.transcript()
            .iter()
            .filter(|line| line.starts_with("? "))
            .count()
    }

    pub fn progress_dots(&self) -> usize {
        *self.dots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn remaining_answers(&self) -> usize {
        self.answers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn record(&self, line: String) {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }
}

impl Console for ScriptedConsole {
    fn say(&self, line: &str) {
        self.record(line.to_string());
    }

    fn progress(&self) {
        *self.dots.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn end_progress(&self) {}

    fn prompt(&self, question: &str) -> io::Result<String> {
        self.record(format!("? {question}"));
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }
}
