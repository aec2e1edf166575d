//! Roadmap domain library: compiles a structured roadmap document into a
//! prioritized flat task list.
//! Modules keep the core pure: parsing is a fold over lines with explicit
//! state, and sorting/allocation/formatting are separate projection passes.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    /// Roadmap task identifier: `PREFIX-N[.N[.N]]`.
    ///
    /// PREFIX is 3–6 uppercase alphanumerics; at most three dot-separated
    /// numeric segments follow the dash.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TaskId {
        pub prefix: String,
        pub segments: Vec<u64>,
    }

    impl fmt::Display for TaskId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}-", self.prefix)?;
            for (idx, segment) in self.segments.iter().enumerate() {
                if idx > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{}", segment)?;
            }
            Ok(())
        }
    }

    /* ----------------------------- Statuses ----------------------------- */

    /// Lifecycle state carried by a task's status symbol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Status {
        Paused,
        Testing,
        InProgress,
        Pending,
        Blocked,
        PendingTesting,
        Completed,
        Rework,
    }

    impl Status {
        /// Coarse ordering bucket derived 1:1 from the status.
        pub fn priority_group(self) -> u8 {
            match self {
                Self::Paused => 1,
                Self::Testing => 2,
                Self::InProgress | Self::Rework => 3,
                Self::Pending => 4,
                Self::Blocked => 5,
                Self::PendingTesting => 99,
                Self::Completed => 100,
            }
        }

        /// Lowercase name used in the `@<status>` output token.
        pub fn tag(self) -> &'static str {
            match self {
                Self::Paused => "paused",
                Self::Testing => "testing",
                Self::InProgress => "inprogress",
                Self::Pending => "pending",
                Self::Blocked => "blocked",
                Self::PendingTesting => "pendingtesting",
                Self::Completed => "completed",
                Self::Rework => "rework",
            }
        }

        pub fn is_completed(self) -> bool {
            matches!(self, Self::Completed)
        }
    }

    /* --------------------------- Value Objects --------------------------- */

    /// Explicit single-letter priority override, e.g. `rnk:B`.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    pub struct Rank(pub char);

    /* ------------------------------- Task ------------------------------- */

    /// One actionable unit extracted from the roadmap document.
    ///
    /// Immutable after parsing; the priority letter assigned during
    /// formatting lives outside the task (see `allocate`).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub uid: Uuid,
        pub id: TaskId,
        /// Cleaned text: ID, tags, and trailing timestamp stripped.
        pub description: String,
        pub status: Status,
        pub rank: Option<Rank>,
        pub due: Option<NaiveDate>,
        pub done: Option<NaiveDate>,
        /// Completion or paused-state timestamp, kept verbatim.
        pub timestamp: Option<String>,
        /// Heading-hierarchy nesting level at time of parse.
        pub depth: usize,
        /// Sanitized heading stack joined by `_`.
        pub source_tag: String,
        /// Monotonic parse-time counter; the sole stability tie-breaker.
        pub insertion_order: u64,
    }

    impl Task {
        pub fn priority_group(&self) -> u8 {
            self.status.priority_group()
        }
    }

    /* ------------------------------- Modes ------------------------------- */

    /// Sort strategy selector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub enum SortMode {
        /// Rank, then status group, then nesting depth for in-progress work.
        #[default]
        Rws,
        /// Lexicographic on description.
        Alpha,
        /// Priority group only.
        Status,
        /// Heading path, RWS within a section.
        Source,
    }

    /// How the compiler run was triggered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub enum RunMode {
        #[default]
        GitTriggered,
        WatcherTriggered,
        /// Refuse automated invocations; only a direct run may overwrite the
        /// output document.
        ManualOnly,
    }

    /* ------------------------------ Warnings ------------------------------ */

    /// A recoverable per-line problem. Reported, never fatal.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Warning {
        /// 1-based source line number.
        pub line: usize,
        pub message: String,
    }

    impl Warning {
        pub fn new(line: usize, message: impl Into<String>) -> Self {
            Self {
                line,
                message: message.into(),
            }
        }
    }

    impl fmt::Display for Warning {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("malformed task id {0:?}")]
        InvalidTaskId(String),
        #[error("invalid date {0:?} (expected MM.DD.YY)")]
        InvalidDate(String),
        #[error("invalid rank {0:?} (expected a single uppercase letter)")]
        InvalidRank(String),
    }
}

pub mod hierarchy {
    //! Heading-driven section tracking.
    //!
    //! The tracker is an explicit value threaded through the document scan,
    //! so parsing stays a pure function of the input text.

    /// Current section path plus the legend skip flag.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct HeadingStack {
        stack: Vec<String>,
        skipping: bool,
    }

    impl HeadingStack {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fold one heading into the tracker.
        ///
        /// The legend heading is never pushed; it only arms the skip flag.
        /// Any heading of level <= 2 disarms it.
        pub fn apply(&mut self, level: usize, text: &str) {
            if is_legend_heading(text) {
                self.skipping = true;
                return;
            }
            if level <= 2 {
                self.skipping = false;
            }
            self.stack.truncate(level.saturating_sub(2));
            self.stack.push(sanitize_heading(text));
        }

        /// Task lines are suppressed while inside the legend section.
        pub fn skipping(&self) -> bool {
            self.skipping
        }

        pub fn depth(&self) -> usize {
            self.stack.len()
        }

        /// The `_`-joined section path applied to tasks parsed under it.
        pub fn source_tag(&self) -> String {
            self.stack.join("_")
        }
    }

    /// The designated legend/definitions heading.
    pub fn is_legend_heading(text: &str) -> bool {
        text.trim().to_lowercase().starts_with("legend")
    }

    /// Strip a `Phase N:` / `Task N:` / `Subtask N:` style prefix, then drop
    /// spaces and ampersands.
    pub fn sanitize_heading(text: &str) -> String {
        strip_stage_prefix(text.trim())
            .chars()
            .filter(|c| *c != ' ' && *c != '&')
            .collect()
    }

    fn strip_stage_prefix(text: &str) -> &str {
        for keyword in ["Phase", "Subtask", "Task"] {
            let Some(rest) = text.strip_prefix(keyword) else {
                continue;
            };
            let rest = rest.trim_start();
            let number_len = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .count();
            if number_len == 0 {
                continue;
            }
            if let Some(tail) = rest[number_len..].strip_prefix(':') {
                return tail.trim_start();
            }
        }
        text
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sanitize_strips_stage_prefix_and_noise() {
            assert_eq!(sanitize_heading("Phase 2: Auth & Billing"), "AuthBilling");
            assert_eq!(sanitize_heading("Task 1.3: Sync Engine"), "SyncEngine");
            assert_eq!(sanitize_heading("Subtask 4: Push Setup"), "PushSetup");
            assert_eq!(sanitize_heading("Release Prep"), "ReleasePrep");
            // A keyword without a numbered colon prefix is ordinary text.
            assert_eq!(sanitize_heading("Task Force"), "TaskForce");
        }

        #[test]
        fn stack_truncates_by_level() {
            let mut stack = HeadingStack::new();
            stack.apply(2, "Alpha");
            stack.apply(3, "Beta");
            assert_eq!(stack.source_tag(), "Alpha_Beta");
            assert_eq!(stack.depth(), 2);

            stack.apply(2, "Gamma");
            assert_eq!(stack.source_tag(), "Gamma");
            assert_eq!(stack.depth(), 1);
        }

        #[test]
        fn level_one_behaves_like_a_root_section() {
            let mut stack = HeadingStack::new();
            stack.apply(1, "Title");
            assert_eq!(stack.source_tag(), "Title");
            stack.apply(2, "Section");
            assert_eq!(stack.source_tag(), "Section");
        }

        #[test]
        fn legend_arms_skip_until_a_shallow_heading() {
            let mut stack = HeadingStack::new();
            stack.apply(2, "Work");
            stack.apply(3, "Legend");
            assert!(stack.skipping());
            // The legend heading itself is not part of the path.
            assert_eq!(stack.source_tag(), "Work");

            // A deeper heading does not disarm the flag.
            stack.apply(3, "Details");
            assert!(stack.skipping());

            stack.apply(2, "More Work");
            assert!(!stack.skipping());
            assert_eq!(stack.source_tag(), "MoreWork");
        }
    }
}

pub mod storage {
    use anyhow::Result;
    use std::path::Path;

    /// Filesystem access behind a seam so the compiler stays testable.
    pub trait DocumentStore {
        fn read(&self, path: &Path) -> Result<String>;

        /// Replace the document's contents entirely, in one write.
        fn write(&self, path: &Path, contents: &str) -> Result<()>;
    }
}

pub mod parser {
    //! Roadmap document parser built on `nom`.
    //!
    //! The outer scan is line-oriented: headings fold into the
    //! `HeadingStack`, list items are gated on the status-symbol table, and
    //! the token grammar (IDs, metadata tags, dates, timestamps) is parsed
    //! with `nom` combinators. Every per-line problem becomes a `Warning`;
    //! parsing itself never fails.

    use crate::core::{DomainError, Rank, Status, Task, TaskId, Warning};
    use crate::hierarchy::HeadingStack;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while},
        character::complete::char,
        combinator::{map_res, recognize},
        error::{VerboseError, VerboseErrorKind},
        sequence::{delimited, tuple},
    };
    use uuid::Uuid;

    /* ------------------------ Public entry points ------------------------ */

    /// Everything a scan of one document yields.
    #[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct Parsed {
        pub tasks: Vec<Task>,
        pub warnings: Vec<Warning>,
    }

    /// Scan a whole roadmap document. Pure: the result is a function of the
    /// input text alone (hierarchy state and the insertion counter are local
    /// to this call).
    pub fn parse_document(input: &str) -> Parsed {
        let mut headings = HeadingStack::new();
        let mut tasks = Vec::new();
        let mut warnings = Vec::new();
        let mut next_order: u64 = 0;

        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');

            if let Some((level, text)) = heading_line(line) {
                headings.apply(level, text);
                continue;
            }
            if headings.skipping() {
                continue;
            }
            let Some((symbol, body)) = list_item(line) else {
                continue;
            };
            let Some(status) = status_for_symbol(symbol) else {
                // A list item without a status symbol is prose, not a task.
                continue;
            };
            if let Some(task) =
                parse_task_body(body, status, &headings, next_order, line_no, &mut warnings)
            {
                tasks.push(task);
                next_order += 1;
            }
        }

        Parsed { tasks, warnings }
    }

    /* --------------------------- Status symbols --------------------------- */

    /// Fixed status-symbol table, in legend display order.
    pub fn symbol_table() -> IndexMap<&'static str, Status> {
        IndexMap::from([
            ("⏸", Status::Paused),
            ("🧪", Status::Testing),
            ("🔄", Status::InProgress),
            ("🔁", Status::Rework),
            ("⏳", Status::Pending),
            ("⛔", Status::Blocked),
            ("🔬", Status::PendingTesting),
            ("✅", Status::Completed),
        ])
    }

    /// Look a symbol token up, tolerating an emoji variation selector.
    pub fn status_for_symbol(token: &str) -> Option<Status> {
        let token = token.trim_end_matches('\u{fe0f}');
        symbol_table().get(token).copied()
    }

    /* ------------------------------- Lines ------------------------------- */

    fn heading_line(line: &str) -> Option<(usize, &str)> {
        let marks = line.chars().take_while(|c| *c == '#').count();
        if marks == 0 {
            return None;
        }
        let text = line[marks..].strip_prefix(' ')?;
        Some((marks, text))
    }

    /// Split a list item into its status-symbol token and the rest.
    fn list_item(line: &str) -> Option<(&str, &str)> {
        let trimmed = line.trim_start();
        let rest = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("+ "))?
            .trim_start();
        match rest.split_once(' ') {
            Some((symbol, body)) => Some((symbol, body)),
            None => Some((rest, "")),
        }
    }

    /* ------------------------------ Task body ------------------------------ */

    fn parse_task_body(
        body: &str,
        status: Status,
        headings: &HeadingStack,
        order: u64,
        line_no: usize,
        warnings: &mut Vec<Warning>,
    ) -> Option<Task> {
        // ID gate: no well-formed ID, no task.
        let (id, rest) = match extract_task_id(body) {
            Ok(pair) => pair,
            Err(message) => {
                warnings.push(Warning::new(line_no, message));
                return None;
            }
        };

        let (rank, rest, rank_warnings) = extract_rank(&rest);
        let (due, rest, due_warnings) = extract_date_tag(&rest, "due");
        let (done, rest, done_warnings) = extract_date_tag(&rest, "done");
        for message in rank_warnings
            .into_iter()
            .chain(due_warnings)
            .chain(done_warnings)
        {
            warnings.push(Warning::new(line_no, message));
        }

        if done.is_some() && !status.is_completed() {
            warnings.push(Warning::new(
                line_no,
                format!("{id}: done date on a non-completed task"),
            ));
        }
        if done.is_none() && status.is_completed() {
            warnings.push(Warning::new(
                line_no,
                format!("{id}: completed task is missing a done date"),
            ));
        }

        let (timestamp, rest) = extract_timestamp(&rest, status);
        let description = collapse_whitespace(&rest);

        Some(Task {
            uid: Uuid::new_v4(),
            id,
            description,
            status,
            rank,
            due,
            done,
            timestamp,
            depth: headings.depth(),
            source_tag: headings.source_tag(),
            insertion_order: order,
        })
    }

    fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /* ------------------------------ Task IDs ------------------------------ */

    /// Locate and strip the `[ PREFIX-N.N.N ]` bracket. The candidate is the
    /// first bracketed group whose interior is not a `key:value` tag.
    fn extract_task_id(text: &str) -> Result<(TaskId, String), String> {
        let mut search = 0;
        while let Some(found) = text[search..].find("[ ") {
            let open = search + found;
            let Some(found_close) = text[open + 2..].find(" ]") else {
                break;
            };
            let close = open + 2 + found_close;
            let interior = &text[open + 2..close];
            if interior.contains(':') {
                search = close + 2;
                continue;
            }
            return match task_id(interior) {
                Ok(id) => {
                    let mut remaining = String::with_capacity(text.len());
                    remaining.push_str(&text[..open]);
                    remaining.push_str(&text[close + 2..]);
                    Ok((id, remaining))
                }
                Err(err) => Err(format!("discarding task: {err}")),
            };
        }
        Err("discarding task: missing task id".to_string())
    }

    /// Validate an ID interior such as `APP-1.2.3`.
    pub fn task_id(input: &str) -> Result<TaskId, DomainError> {
        let invalid = || DomainError::InvalidTaskId(input.to_string());
        let (prefix, numbers) = input.split_once('-').ok_or_else(invalid)?;
        let prefix_ok = (3..=6).contains(&prefix.len())
            && prefix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !prefix_ok {
            return Err(invalid());
        }
        let segments: Vec<u64> = numbers
            .split('.')
            .map(|segment| {
                if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                segment.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<Result<_, _>>()?;
        if segments.is_empty() || segments.len() > 3 {
            return Err(invalid());
        }
        Ok(TaskId {
            prefix: prefix.to_string(),
            segments,
        })
    }

    /* ---------------------------- Metadata tags ---------------------------- */

    /// Strip every `• [ key:VALUE ]` occurrence, returning the raw values in
    /// order and the remaining text.
    fn take_tag_occurrences(text: &str, key: &str) -> (Vec<String>, String) {
        let needle = format!("• [ {key}:");
        let mut values = Vec::new();
        let mut remaining = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(&needle) {
            let after_key = &rest[start + needle.len()..];
            let Some(end) = after_key.find(" ]") else {
                break;
            };
            values.push(after_key[..end].to_string());
            remaining.push_str(&rest[..start]);
            rest = &after_key[end + 2..];
        }
        remaining.push_str(rest);
        (values, remaining)
    }

    fn first_value(
        values: Vec<String>,
        key: &str,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        if values.len() > 1 {
            warnings.push(format!("duplicate {key} tag; keeping the first"));
        }
        values.into_iter().next()
    }

    /// `• [ rnk:X ]` — explicit priority override.
    pub fn extract_rank(text: &str) -> (Option<Rank>, String, Vec<String>) {
        let (values, remaining) = take_tag_occurrences(text, "rnk");
        let mut warnings = Vec::new();
        let rank = match first_value(values, "rnk", &mut warnings) {
            Some(raw) => match rank_value(&raw) {
                Ok(rank) => Some(rank),
                Err(err) => {
                    warnings.push(err.to_string());
                    None
                }
            },
            None => None,
        };
        (rank, remaining, warnings)
    }

    fn rank_value(raw: &str) -> Result<Rank, DomainError> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) if letter.is_ascii_uppercase() => Ok(Rank(letter)),
            _ => Err(DomainError::InvalidRank(raw.to_string())),
        }
    }

    /// `• [ due:MM.DD.YY ]` / `• [ done:MM.DD.YY ]`.
    pub fn extract_date_tag(text: &str, key: &str) -> (Option<NaiveDate>, String, Vec<String>) {
        let (values, remaining) = take_tag_occurrences(text, key);
        let mut warnings = Vec::new();
        let date = match first_value(values, key, &mut warnings) {
            Some(raw) => match source_date(&raw) {
                Ok(date) => Some(date),
                Err(err) => {
                    warnings.push(format!("{key} tag dropped: {err}"));
                    None
                }
            },
            None => None,
        };
        (date, remaining, warnings)
    }

    /* ------------------------------- Dates ------------------------------- */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Parse and validate `MM.DD.YY`, applying the century pivot.
    pub fn source_date(input: &str) -> Result<NaiveDate, DomainError> {
        match parse_source_date(input) {
            Ok(("", date)) => Ok(date),
            _ => Err(DomainError::InvalidDate(input.to_string())),
        }
    }

    /// Two-digit years pivot at 50: 00–50 → 2000s, 51–99 → 1900s.
    /// An inherited convention, kept as-is.
    pub fn pivot_year(two_digit: u32) -> i32 {
        if two_digit <= 50 {
            2000 + two_digit as i32
        } else {
            1900 + two_digit as i32
        }
    }

    fn parse_source_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((two_digits, char('.'), two_digits, char('.'), two_digits)),
            |(month, _, day, _, year)| {
                NaiveDate::from_ymd_opt(pivot_year(year), month, day)
                    .ok_or("invalid calendar date")
            },
        )(i)
    }

    fn two_digits(i: &str) -> PResult<'_, u32> {
        map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
            s.parse::<u32>()
        })(i)
    }

    /* ----------------------------- Timestamps ----------------------------- */

    /// Strip the status-appropriate trailing timestamp, kept verbatim.
    /// Only completed and paused tasks carry one.
    pub fn extract_timestamp(text: &str, status: Status) -> (Option<String>, String) {
        match status {
            Status::Completed => take_completion_timestamp(text),
            Status::Paused => take_paused_timestamp(text),
            _ => (None, text.to_string()),
        }
    }

    /// Trailing `MM.DD.YY | H:MM AM/PM TZ`.
    fn take_completion_timestamp(text: &str) -> (Option<String>, String) {
        let trimmed = text.trim_end();
        if let Some(pos) = trimmed.rfind(" | ") {
            if pos >= 8 && trimmed.is_char_boundary(pos - 8) {
                let start = pos - 8;
                let preceded_ok =
                    start == 0 || trimmed[..start].ends_with(|c: char| c.is_whitespace());
                if preceded_ok {
                    let candidate = &trimmed[start..];
                    if matches!(completion_stamp(candidate), Ok(("", _))) {
                        return (Some(candidate.to_string()), trimmed[..start].to_string());
                    }
                }
            }
        }
        (None, text.to_string())
    }

    /// Trailing `[Paused: III - MM.DD.YY | H:MM AM/PM TZ]`, stored without
    /// the brackets.
    fn take_paused_timestamp(text: &str) -> (Option<String>, String) {
        let trimmed = text.trim_end();
        if !trimmed.ends_with(']') {
            return (None, text.to_string());
        }
        if let Some(start) = trimmed.rfind("[Paused: ") {
            if let Ok(("", inner)) = paused_stamp(&trimmed[start..]) {
                return (Some(inner.to_string()), trimmed[..start].to_string());
            }
        }
        (None, text.to_string())
    }

    fn completion_stamp(i: &str) -> PResult<'_, &str> {
        recognize(tuple((date_pattern, tag(" | "), clock_time)))(i)
    }

    fn paused_stamp(i: &str) -> PResult<'_, &str> {
        delimited(
            char('['),
            recognize(tuple((
                tag("Paused: "),
                take_while_m_n(1, 5, char_is_upper),
                tag(" - "),
                date_pattern,
                tag(" | "),
                clock_time,
            ))),
            char(']'),
        )(i)
    }

    /// `MM.DD.YY` digit shape; calendar validity is not required here since
    /// the value is stored verbatim.
    fn date_pattern(i: &str) -> PResult<'_, &str> {
        recognize(tuple((
            take_while_m_n(2, 2, char_is_digit),
            char('.'),
            take_while_m_n(2, 2, char_is_digit),
            char('.'),
            take_while_m_n(2, 2, char_is_digit),
        )))(i)
    }

    /// `H:MM AM/PM TZ`.
    fn clock_time(i: &str) -> PResult<'_, &str> {
        recognize(tuple((
            take_while_m_n(1, 2, char_is_digit),
            char(':'),
            take_while_m_n(2, 2, char_is_digit),
            char(' '),
            alt((tag("AM"), tag("PM"))),
            char(' '),
            take_while_m_n(2, 5, char_is_upper),
        )))(i)
    }

    fn take_while_m_n<F>(m: usize, n: usize, cond: F) -> impl Fn(&str) -> PResult<'_, &str>
    where
        F: Fn(char) -> bool + Copy,
    {
        move |i: &str| {
            let (i, out) = take_while(cond)(i)?;
            if out.len() < m || out.len() > n {
                Err(nom::Err::Error(VerboseError {
                    errors: vec![(i, VerboseErrorKind::Context("m_n"))],
                }))
            } else {
                Ok((i, out))
            }
        }
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn char_is_upper(c: char) -> bool {
        c.is_ascii_uppercase()
    }

}

pub mod sort {
    //! Ordering strategies over parsed tasks.
    //!
    //! Every mode partitions completed tasks out first and appends them, in
    //! their original relative order, after all non-completed tasks. The RWS
    //! comparator is an explicit lexicographic chain of single-criterion
    //! comparators; the first non-equal one decides.

    use crate::core::{SortMode, Task};
    use std::cmp::Ordering;

    const IN_PROGRESS_GROUP: u8 = 3;

    /// Order tasks per `mode`.
    pub fn sort_tasks(tasks: Vec<Task>, mode: SortMode) -> Vec<Task> {
        let (mut active, completed): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|task| !task.status.is_completed());
        match mode {
            SortMode::Alpha => active.sort_by(|a, b| {
                a.description
                    .cmp(&b.description)
                    .then_with(|| cmp_insertion(a, b))
            }),
            SortMode::Status => {
                active.sort_by(|a, b| cmp_priority_group(a, b).then_with(|| cmp_insertion(a, b)))
            }
            SortMode::Source => active.sort_by(|a, b| {
                a.source_tag.cmp(&b.source_tag).then_with(|| cmp_rws(a, b))
            }),
            SortMode::Rws => active.sort_by(cmp_rws),
        }
        active.extend(completed);
        active
    }

    /// The RWS chain: ranked-first, rank letter, priority group, depth for
    /// in-progress work, insertion order.
    pub fn cmp_rws(a: &Task, b: &Task) -> Ordering {
        cmp_rank_presence(a, b)
            .then_with(|| cmp_rank_letter(a, b))
            .then_with(|| cmp_priority_group(a, b))
            .then_with(|| cmp_depth_for_in_progress(a, b))
            .then_with(|| cmp_insertion(a, b))
    }

    /// Any ranked task sorts before any unranked one.
    fn cmp_rank_presence(a: &Task, b: &Task) -> Ordering {
        b.rank.is_some().cmp(&a.rank.is_some())
    }

    fn cmp_rank_letter(a: &Task, b: &Task) -> Ordering {
        match (a.rank, b.rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        }
    }

    fn cmp_priority_group(a: &Task, b: &Task) -> Ordering {
        a.priority_group().cmp(&b.priority_group())
    }

    /// Deeper nesting first, and only when both tasks are in-progress work.
    fn cmp_depth_for_in_progress(a: &Task, b: &Task) -> Ordering {
        if a.priority_group() == IN_PROGRESS_GROUP && b.priority_group() == IN_PROGRESS_GROUP {
            b.depth.cmp(&a.depth)
        } else {
            Ordering::Equal
        }
    }

    fn cmp_insertion(a: &Task, b: &Task) -> Ordering {
        a.insertion_order.cmp(&b.insertion_order)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{Rank, SortMode, Status, Task, TaskId};
        use uuid::Uuid;

        fn task(order: u64, status: Status, description: &str) -> Task {
            Task {
                uid: Uuid::new_v4(),
                id: TaskId {
                    prefix: "TST".to_string(),
                    segments: vec![order],
                },
                description: description.to_string(),
                status,
                rank: None,
                due: None,
                done: None,
                timestamp: None,
                depth: 1,
                source_tag: "Section".to_string(),
                insertion_order: order,
            }
        }

        fn descriptions(tasks: &[Task]) -> Vec<&str> {
            tasks.iter().map(|t| t.description.as_str()).collect()
        }

        #[test]
        fn completed_tasks_trail_in_original_order_in_every_mode() {
            for mode in [
                SortMode::Rws,
                SortMode::Alpha,
                SortMode::Status,
                SortMode::Source,
            ] {
                let tasks = vec![
                    task(0, Status::Completed, "done one"),
                    task(1, Status::Pending, "active"),
                    task(2, Status::Completed, "done two"),
                ];
                let sorted = sort_tasks(tasks, mode);
                assert_eq!(
                    descriptions(&sorted),
                    vec!["active", "done one", "done two"],
                    "{mode:?}"
                );
            }
        }

        #[test]
        fn alpha_sorts_by_description_with_insertion_ties() {
            let mut a = task(0, Status::Pending, "same");
            let mut b = task(1, Status::Pending, "same");
            a.insertion_order = 5;
            b.insertion_order = 2;
            let sorted = sort_tasks(vec![a, b], SortMode::Alpha);
            assert_eq!(sorted[0].insertion_order, 2);

            let tasks = vec![
                task(0, Status::Pending, "zeta"),
                task(1, Status::Pending, "alpha"),
            ];
            let sorted = sort_tasks(tasks, SortMode::Alpha);
            assert_eq!(descriptions(&sorted), vec!["alpha", "zeta"]);
        }

        #[test]
        fn status_mode_orders_by_priority_group() {
            let tasks = vec![
                task(0, Status::Pending, "pending"),
                task(1, Status::Paused, "paused"),
                task(2, Status::InProgress, "inprogress"),
                task(3, Status::PendingTesting, "pendingtesting"),
                task(4, Status::Blocked, "blocked"),
                task(5, Status::Testing, "testing"),
            ];
            let sorted = sort_tasks(tasks, SortMode::Status);
            assert_eq!(
                descriptions(&sorted),
                vec![
                    "paused",
                    "testing",
                    "inprogress",
                    "pending",
                    "blocked",
                    "pendingtesting"
                ]
            );
        }

        #[test]
        fn source_mode_groups_by_section_then_rws() {
            let mut far = task(0, Status::Pending, "far");
            far.source_tag = "Zulu".to_string();
            let mut near_unranked = task(1, Status::Pending, "near unranked");
            near_unranked.source_tag = "Alpha".to_string();
            let mut near_ranked = task(2, Status::Pending, "near ranked");
            near_ranked.source_tag = "Alpha".to_string();
            near_ranked.rank = Some(Rank('A'));

            let sorted = sort_tasks(vec![far, near_unranked, near_ranked], SortMode::Source);
            assert_eq!(
                descriptions(&sorted),
                vec!["near ranked", "near unranked", "far"]
            );
        }

        #[test]
        fn rws_ranked_tasks_come_first_in_letter_order() {
            let mut ranked_c = task(0, Status::Blocked, "ranked c");
            ranked_c.rank = Some(Rank('C'));
            let mut ranked_a = task(1, Status::Pending, "ranked a");
            ranked_a.rank = Some(Rank('A'));
            let unranked = task(2, Status::Paused, "unranked");

            let sorted = sort_tasks(vec![ranked_c, ranked_a, unranked], SortMode::Rws);
            assert_eq!(
                descriptions(&sorted),
                vec!["ranked a", "ranked c", "unranked"]
            );
        }

        #[test]
        fn rws_depth_breaks_ties_only_for_in_progress_work() {
            let mut shallow = task(0, Status::InProgress, "shallow");
            shallow.depth = 1;
            let mut deep = task(1, Status::InProgress, "deep");
            deep.depth = 2;
            let sorted = sort_tasks(vec![shallow, deep], SortMode::Rws);
            assert_eq!(descriptions(&sorted), vec!["deep", "shallow"]);

            // Pending tasks ignore depth and fall back to insertion order.
            let mut shallow = task(0, Status::Pending, "first");
            shallow.depth = 1;
            let mut deep = task(1, Status::Pending, "second");
            deep.depth = 2;
            let sorted = sort_tasks(vec![shallow, deep], SortMode::Rws);
            assert_eq!(descriptions(&sorted), vec!["first", "second"]);
        }

        #[test]
        fn rework_shares_the_in_progress_group() {
            let mut rework_deep = task(0, Status::Rework, "rework deep");
            rework_deep.depth = 3;
            let mut in_progress = task(1, Status::InProgress, "inprogress shallow");
            in_progress.depth = 1;
            let sorted = sort_tasks(vec![in_progress, rework_deep], SortMode::Rws);
            assert_eq!(
                descriptions(&sorted),
                vec!["rework deep", "inprogress shallow"]
            );
        }
    }
}

pub mod allocate {
    //! Priority-letter assignment for RWS output.
    //!
    //! A dedicated post-sort pass: explicit ranks are preserved verbatim,
    //! and unranked tasks take letters from a cursor seeded past the highest
    //! explicit rank, so auto-assigned letters never collide with or precede
    //! an override.

    use crate::core::Task;
    use std::collections::BTreeSet;

    /// Compute per-task priority letters, index-aligned with `tasks`
    /// (expected to be in sorted order). Completed tasks get none; once the
    /// cursor runs past `Z`, remaining unranked tasks get none either.
    pub fn assign_letters(tasks: &[Task]) -> Vec<Option<char>> {
        let explicit: BTreeSet<char> = tasks
            .iter()
            .filter_map(|task| task.rank.map(|rank| rank.0))
            .collect();
        let mut cursor = match explicit.iter().next_back() {
            Some(max) => next_letter(*max),
            None => Some('A'),
        };
        let mut used = explicit;

        tasks
            .iter()
            .map(|task| {
                if task.status.is_completed() {
                    return None;
                }
                if let Some(rank) = task.rank {
                    return Some(rank.0);
                }
                while let Some(letter) = cursor {
                    cursor = next_letter(letter);
                    if used.insert(letter) {
                        return Some(letter);
                    }
                }
                None
            })
            .collect()
    }

    fn next_letter(letter: char) -> Option<char> {
        if letter >= 'Z' {
            None
        } else {
            Some((letter as u8 + 1) as char)
        }
    }

}

pub mod format {
    //! Fixed output line grammar.

    use crate::core::Task;
    use chrono::NaiveDate;

    /// Render one task into the interchange line format:
    /// `x `/`(L) ` marker, `@status`, description, then ` - `-separated
    /// metadata in fixed order (src, due, done, ts).
    pub fn format_line(task: &Task, letter: Option<char>) -> String {
        let mut out = String::new();
        if task.status.is_completed() {
            out.push_str("x ");
        } else if let Some(letter) = letter {
            out.push('(');
            out.push(letter);
            out.push_str(") ");
        }
        out.push('@');
        out.push_str(task.status.tag());
        out.push(' ');
        out.push_str(&task.description);

        let mut metadata = Vec::new();
        if !task.source_tag.is_empty() {
            metadata.push(format!("src:+{}", task.source_tag));
        }
        if let Some(due) = task.due {
            metadata.push(format!("due:{}", iso_date(due)));
        }
        if task.status.is_completed() {
            if let Some(done) = task.done {
                metadata.push(format!("done:{}", iso_date(done)));
            }
        }
        if let Some(timestamp) = &task.timestamp {
            metadata.push(format!("ts:{}", timestamp.replace(" | ", "_")));
        }
        for segment in metadata {
            out.push_str(" - ");
            out.push_str(&segment);
        }
        out
    }

    pub fn iso_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

}

pub mod compiler {
    //! One-shot orchestration: read, compile, write.
    //!
    //! `compile_str` is the pure pipeline (parse → sort → allocate → format
    //! → join); `compile_file` wraps it with the single input read and the
    //! single, full output write, gated by the run-mode policy.

    use crate::allocate::assign_letters;
    use crate::core::{RunMode, SortMode, Warning};
    use crate::format::format_line;
    use crate::parser::parse_document;
    use crate::sort::sort_tasks;
    use crate::storage::DocumentStore;
    use anyhow::{Context, Result};
    use std::{fs, path::Path};

    #[cfg(windows)]
    const LINE_ENDING: &str = "\r\n";
    #[cfg(not(windows))]
    const LINE_ENDING: &str = "\n";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileOptions {
        pub sort_mode: SortMode,
        pub run_mode: RunMode,
        /// Direct human invocation detected (extra CLI arguments present).
        pub manual_invocation: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CompileOutcome {
        /// The complete output document.
        pub output: String,
        pub task_count: usize,
        pub warnings: Vec<Warning>,
    }

    #[derive(Debug, thiserror::Error)]
    pub enum CompileError {
        #[error(
            "manual-only run mode: refusing an automated invocation \
             (pass an extra argument to confirm a direct run)"
        )]
        RefusedAutomatedRun,
    }

    /// Whether the run-mode policy lets this invocation proceed.
    pub fn run_permitted(mode: RunMode, manual_invocation: bool) -> bool {
        match mode {
            RunMode::GitTriggered | RunMode::WatcherTriggered => true,
            RunMode::ManualOnly => manual_invocation,
        }
    }

    /// The whole transformation as a pure function of the input document and
    /// the two mode selectors.
    pub fn compile_str(
        input: &str,
        opts: &CompileOptions,
    ) -> Result<CompileOutcome, CompileError> {
        if !run_permitted(opts.run_mode, opts.manual_invocation) {
            return Err(CompileError::RefusedAutomatedRun);
        }

        let parsed = parse_document(input);
        let tasks = sort_tasks(parsed.tasks, opts.sort_mode);
        let letters = match opts.sort_mode {
            SortMode::Rws => assign_letters(&tasks),
            _ => vec![None; tasks.len()],
        };
        let lines: Vec<String> = tasks
            .iter()
            .zip(&letters)
            .map(|(task, letter)| format_line(task, *letter))
            .collect();
        let mut output = lines.join(LINE_ENDING);
        if !output.is_empty() {
            output.push_str(LINE_ENDING);
        }

        Ok(CompileOutcome {
            output,
            task_count: tasks.len(),
            warnings: parsed.warnings,
        })
    }

    /// Read the roadmap, compile it, and fully replace the output document.
    pub fn compile_file(
        store: &dyn DocumentStore,
        input: &Path,
        output: &Path,
        opts: &CompileOptions,
    ) -> Result<CompileOutcome> {
        let text = store.read(input)?;
        let outcome = compile_str(&text, opts)?;
        store.write(output, &outcome.output)?;
        Ok(outcome)
    }

    /// Concrete store backed by the local filesystem.
    pub struct FsDocumentStore;

    impl DocumentStore for FsDocumentStore {
        fn read(&self, path: &Path) -> Result<String> {
            fs::read_to_string(path).with_context(|| format!("reading {:?}", path))
        }

        fn write(&self, path: &Path, contents: &str) -> Result<()> {
            fs::write(path, contents.as_bytes()).with_context(|| format!("writing {:?}", path))
        }
    }

}

pub use compiler::{CompileOptions, CompileOutcome, compile_str};
pub use parser::{Parsed, parse_document};
