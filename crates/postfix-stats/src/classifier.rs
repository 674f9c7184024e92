// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of Postfix log lines into message lifecycle events.
//!
//! A line is first checked for the syslog-style Postfix prefix (timestamp, hostname and a
//! `postfix/` or `postfix-<instance>/` process tag). The remainder, starting at the process
//! name, is then matched against an ordered rule table. Rules overlap (a forwarded delivery
//! also carries `status=sent`), so the first matching rule wins.

use derive_more::{Display, Into};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::errors::ClassifyError;

/// Postfix queue id, an uppercase hexadecimal token.
#[derive(Debug, Display, Into, Clone, PartialEq, Eq, Hash)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A lifecycle step observed for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Message entered the queue through smtpd or pickup.
    Received(QueueId),
    /// The queue manager activated the message; carries its size in bytes.
    QueueActive(QueueId, u64),
    /// Message left the queue for good.
    Removed(QueueId),
    Forwarded,
    Delivered(QueueId),
    Bounced,
    Deferred,
    Rejected,
    Discarded,
    Held,
}

/// Identifies a rule in the classification table.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    #[display("received")]
    Received,
    #[display("queue-active")]
    QueueActive,
    #[display("removed")]
    Removed,
    #[display("forwarded")]
    Forwarded,
    #[display("delivered")]
    Delivered,
    #[display("bounced")]
    Bounced,
    #[display("deferred")]
    Deferred,
    #[display("rejected")]
    Rejected,
    #[display("discarded")]
    Discarded,
    #[display("held")]
    Held,
}

/// A single entry of the rule table: a pattern over the line remainder and the event it yields.
#[derive(Debug)]
pub struct Rule {
    kind: RuleKind,
    pattern: Regex,
}

impl Rule {
    fn new(kind: RuleKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: compile(pattern),
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Matches the rule against a line remainder (the text after the Postfix prefix).
    ///
    /// Returns `None` when the rule does not apply.
    pub fn apply(&self, remainder: &str) -> Option<Result<LifecycleEvent, ClassifyError>> {
        let caps = self.pattern.captures(remainder)?;
        Some(self.event(&caps))
    }

    fn event(&self, caps: &Captures<'_>) -> Result<LifecycleEvent, ClassifyError> {
        let event = match self.kind {
            RuleKind::Received => LifecycleEvent::Received(queue_id(caps)),
            RuleKind::QueueActive => {
                let id = queue_id(caps);
                let raw = caps.get(2).map_or("", |m| m.as_str());
                let size = raw.parse::<u64>().map_err(|_| ClassifyError::InvalidSize {
                    queue_id: id.to_string(),
                    size: raw.to_string(),
                })?;
                LifecycleEvent::QueueActive(id, size)
            }
            RuleKind::Removed => LifecycleEvent::Removed(queue_id(caps)),
            RuleKind::Forwarded => LifecycleEvent::Forwarded,
            RuleKind::Delivered => LifecycleEvent::Delivered(queue_id(caps)),
            RuleKind::Bounced => LifecycleEvent::Bounced,
            RuleKind::Deferred => LifecycleEvent::Deferred,
            RuleKind::Rejected => LifecycleEvent::Rejected,
            RuleKind::Discarded => LifecycleEvent::Discarded,
            RuleKind::Held => LifecycleEvent::Held,
        };
        Ok(event)
    }
}

// Patterns are literals in this module, covered by the tests below.
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("failed creating regex")
}

fn queue_id(caps: &Captures<'_>) -> QueueId {
    QueueId::new(caps.get(1).map_or("", |m| m.as_str()))
}

lazy_static! {
    static ref POSTFIX_PREFIX: Regex = compile(
        r"^[JAMDFONS][aeucop][nrbcglptvy] [1-3 ][0-9] [0-2][0-9]:[0-5][0-9]:[0-5][0-9] \S+ postfix(?:-[^/\s]+)?/"
    );

    static ref RULES: [Rule; 10] = [
        Rule::new(
            RuleKind::Received,
            r"^(?:smtpd|pickup)\[[0-9]+\]: ([0-9A-F]+): (?:client|uid|sender)=",
        ),
        Rule::new(
            RuleKind::QueueActive,
            r"^qmgr\[[0-9]+\]: ([0-9A-F]+): .* size=([0-9]+)[, ].+queue active",
        ),
        Rule::new(
            RuleKind::Removed,
            r"^(?:qmgr|postsuper)\[[0-9]+\]: ([0-9A-F]+): removed",
        ),
        Rule::new(RuleKind::Forwarded, r"forwarded as "),
        Rule::new(RuleKind::Delivered, r"\[[0-9]+\]: ([0-9A-F]+): .+ status=sent"),
        Rule::new(RuleKind::Bounced, r"\[[0-9]+\]: ([0-9A-F]+): .+ status=bounced"),
        Rule::new(RuleKind::Deferred, r"\[[0-9]+\]: ([0-9A-F]+): .+ status=deferred"),
        Rule::new(RuleKind::Rejected, r"^(?:smtpd|cleanup)\[[0-9]+\]: .*?\breject: "),
        Rule::new(RuleKind::Discarded, r": NOQUEUE: discard: "),
        Rule::new(RuleKind::Held, r" NOQUEUE: hold: "),
    ];
}

/// The rule table in evaluation order.
pub fn rules() -> &'static [Rule] {
    RULES.as_slice()
}

/// Returns the part of `line` after the Postfix prefix, or `None` for lines from other
/// programs, blank lines and continuation lines.
pub fn strip_prefix(line: &str) -> Option<&str> {
    POSTFIX_PREFIX.find(line).map(|m| &line[m.end()..])
}

/// Classifies one log line.
///
/// `Ok(None)` means the line is not relevant. An error is returned only when a rule matched
/// but one of its fields could not be used; the line should then be treated as unclassified.
pub fn classify(line: &str) -> Result<Option<LifecycleEvent>, ClassifyError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some(remainder) = strip_prefix(line) else {
        return Ok(None);
    };
    rules()
        .iter()
        .find_map(|rule| rule.apply(remainder))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "Oct 19 10:15:02 mx1 postfix/";

    fn line(rest: &str) -> String {
        format!("{PREFIX}{rest}")
    }

    fn rule(kind: RuleKind) -> &'static Rule {
        rules()
            .iter()
            .find(|r| r.kind() == kind)
            .expect("rule must exist")
    }

    #[test]
    fn test_prefix_length() {
        let cases = [
            ("Jan  1 01:05:02 mailserver postfix/local[17781]:", 35),
            ("Feb 10 01:05:02 mailserver postfix/local[17781]:", 35),
            ("Mar 21 01:05:02 mailserver postfix/local[17781]:", 35),
            ("Apr 31 01:05:02 mailserver postfix/local[17781]:", 35),
            ("May 12 00:00:00 mailserver postfix/local[17781]:", 35),
            ("Jun 13 01:11:11 mailserver postfix/local[17781]:", 35),
            ("Jul 14 02:22:22 mailserver postfix/local[17781]:", 35),
            ("Aug 15 01:33:33 mailserver postfix/local[17781]:", 35),
            ("Sep 16 01:44:44 mailserver postfix/local[17781]:", 35),
            ("Oct 17 01:55:55 mailserver postfix/local[17781]:", 35),
            ("Nov 18 01:05:06 mailserver postfix/local[17781]:", 35),
            (
                "Dec 19 01:05:07 mailserver postfix-instance_name/local[17781]:",
                49,
            ),
        ];
        for (text, prefix_len) in cases {
            let remainder = strip_prefix(text).unwrap_or_else(|| panic!("{text:?} must match"));
            assert_eq!(text.len() - remainder.len(), prefix_len, "{text:?}");
        }
    }

    #[test]
    fn test_non_postfix_lines_are_ignored() {
        let cases = [
            "",
            "   ",
            "Oct 19 10:15:02 mx1 dovecot: imap-login: Login: user=<a>",
            "Oct 19 10:15:02 mx1 sshd[22]: Accepted publickey",
            "Xyz 19 10:15:02 mx1 postfix/smtpd[1]: AD1: client=x",
            "Oct 19 10:15 mx1 postfix/smtpd[1]: AD1: client=x",
            "\tcontinuation of a previous line status=sent",
        ];
        for text in cases {
            assert_eq!(classify(text), Ok(None), "{text:?}");
        }
    }

    #[test]
    fn test_received() {
        assert_eq!(
            classify(&line(
                "smtpd[4211]: AD1: client=relay.example.com[192.0.2.10]"
            )),
            Ok(Some(LifecycleEvent::Received(QueueId::new("AD1"))))
        );
        assert_eq!(
            classify(&line("pickup[118]: 3F2A9C0: uid=1000 from=<root>")),
            Ok(Some(LifecycleEvent::Received(QueueId::new("3F2A9C0"))))
        );
        assert!(rule(RuleKind::Received)
            .apply("cleanup[1]: AD1: message-id=<x@y>")
            .is_none());
    }

    #[test]
    fn test_queue_active() {
        let text = line("qmgr[877]: AD1: from=<a@example.com>, size=1000, nrcpt=1 (queue active)");
        assert_eq!(
            classify(&text),
            Ok(Some(LifecycleEvent::QueueActive(QueueId::new("AD1"), 1000)))
        );
    }

    #[test]
    fn test_queue_active_invalid_size() {
        let text = line(
            "qmgr[877]: AD1: from=<a@example.com>, size=99999999999999999999999, nrcpt=1 (queue active)",
        );
        assert_eq!(
            classify(&text),
            Err(ClassifyError::InvalidSize {
                queue_id: "AD1".to_string(),
                size: "99999999999999999999999".to_string(),
            })
        );
    }

    #[test]
    fn test_non_ascii_digits_do_not_match() {
        let text = line(
            "qmgr[877]: AD1: from=<a@example.com>, size=\u{0661}\u{0662}, nrcpt=1 (queue active)",
        );
        assert_eq!(classify(&text), Ok(None));

        let text = "Oct \u{0661}9 10:15:02 mx1 postfix/qmgr[877]: AD1: removed";
        assert_eq!(strip_prefix(text), None);
        assert_eq!(classify(&line("qmgr[\u{0668}77]: AD1: removed")), Ok(None));
    }

    #[test]
    fn test_removed() {
        assert_eq!(
            classify(&line("qmgr[877]: AD1: removed")),
            Ok(Some(LifecycleEvent::Removed(QueueId::new("AD1"))))
        );
        assert_eq!(
            classify(&line("postsuper[90]: 9A0B: removed")),
            Ok(Some(LifecycleEvent::Removed(QueueId::new("9A0B"))))
        );
    }

    #[test]
    fn test_forwarded_wins_over_delivered() {
        let text = line(
            "local[17781]: 9093C182F98: to=<x@example.com>, relay=local, delay=0.04, \
             delays=0.03/0.01/0/0, dsn=2.0.0, status=sent (forwarded as 96643182F99)",
        );
        assert_eq!(classify(&text), Ok(Some(LifecycleEvent::Forwarded)));
        assert!(rule(RuleKind::Delivered)
            .apply(strip_prefix(&text).expect("prefix"))
            .is_some());
    }

    #[test]
    fn test_delivery_outcomes() {
        assert_eq!(
            classify(&line(
                "smtp[5001]: AD1: to=<b@example.org>, relay=mx.example.org[198.51.100.7]:25, \
                 delay=1.2, dsn=2.0.0, status=sent (250 2.0.0 Ok)"
            )),
            Ok(Some(LifecycleEvent::Delivered(QueueId::new("AD1"))))
        );
        assert_eq!(
            classify(&line(
                "smtp[5001]: AD2: to=<c@example.org>, relay=none, delay=30, dsn=5.1.1, \
                 status=bounced (user unknown)"
            )),
            Ok(Some(LifecycleEvent::Bounced))
        );
        assert_eq!(
            classify(&line(
                "smtp[5001]: AD3: to=<d@example.org>, relay=none, delay=30, dsn=4.4.1, \
                 status=deferred (connection timed out)"
            )),
            Ok(Some(LifecycleEvent::Deferred))
        );
    }

    #[test]
    fn test_noqueue_events() {
        assert_eq!(
            classify(&line(
                "smtpd[4211]: NOQUEUE: reject: RCPT from unknown[203.0.113.9]: 554 5.7.1 \
                 Relay access denied; from=<s@spam.test> to=<v@example.com>"
            )),
            Ok(Some(LifecycleEvent::Rejected))
        );
        assert_eq!(
            classify(&line(
                "cleanup[300]: 4B1C: milter-reject: END-OF-MESSAGE from x: 5.7.1 Spam"
            )),
            Ok(Some(LifecycleEvent::Rejected))
        );
        assert_eq!(
            classify(&line(
                "smtpd[4211]: NOQUEUE: discard: RCPT from unknown[203.0.113.9]: <v@example.com>"
            )),
            Ok(Some(LifecycleEvent::Discarded))
        );
        assert_eq!(
            classify(&line(
                "smtpd[4211]: NOQUEUE: hold: RCPT from unknown[203.0.113.9]: <v@example.com>"
            )),
            Ok(Some(LifecycleEvent::Held))
        );
    }

    #[test]
    fn test_unmatched_remainder() {
        assert_eq!(
            classify(&line("smtpd[4211]: connect from unknown[203.0.113.9]")),
            Ok(None)
        );
        assert_eq!(
            classify(&line("anvil[12]: statistics: max connection rate 1/60s")),
            Ok(None)
        );
    }

    #[test]
    fn test_multi_instance_and_line_endings() {
        assert_eq!(
            classify("Oct 19 10:15:02 mx1 postfix-out/qmgr[877]: AD1: removed\r\n"),
            Ok(Some(LifecycleEvent::Removed(QueueId::new("AD1"))))
        );
    }

    #[test]
    fn test_rule_order() {
        let kinds: Vec<RuleKind> = rules().iter().map(Rule::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::Received,
                RuleKind::QueueActive,
                RuleKind::Removed,
                RuleKind::Forwarded,
                RuleKind::Delivered,
                RuleKind::Bounced,
                RuleKind::Deferred,
                RuleKind::Rejected,
                RuleKind::Discarded,
                RuleKind::Held,
            ]
        );
    }
}
