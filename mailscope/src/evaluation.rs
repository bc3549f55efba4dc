//! Offline quality check: summary overlap with gold summaries and sentiment accuracy.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::language::LanguageTag;
use crate::sentiment::{SentimentCategory, SentimentClassifier};
use crate::summarizer::budget::Mode;
use crate::summarizer::SummarizationController;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// |A ∩ B| / |A ∪ B| over lowercase word sets; 1.0 when both are empty.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words = |text: &str| -> HashSet<String> {
        let lower = text.to_lowercase();
        WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
    };
    let (set_a, set_b) = (words(a), words(b));
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let shared = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    shared as f64 / union as f64
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub email: &'static str,
    pub gold_summary: &'static str,
    pub gold_sentiment: SentimentCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    pub index: usize,
    pub jaccard: f64,
    pub generated_summary: String,
    pub gold_sentiment: SentimentCategory,
    pub predicted_sentiment: SentimentCategory,
    pub sentiment_label: String,
    pub sentiment_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub results: Vec<SampleResult>,
    pub correct_sentiment: usize,
}

impl EvaluationReport {
    pub fn sentiment_accuracy(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.correct_sentiment as f64 / self.results.len() as f64
    }

    pub fn mean_jaccard(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.results.iter().map(|r| r.jaccard).sum::<f64>() / self.results.len() as f64
    }
}

pub async fn evaluate(
    samples: &[Sample],
    controller: &SummarizationController,
    classifier: &SentimentClassifier,
    mode: Mode,
) -> EvaluationReport {
    let mut results = Vec::with_capacity(samples.len());
    let mut correct_sentiment = 0;

    for (idx, sample) in samples.iter().enumerate() {
        let generated_summary = controller.summarize(sample.email, LanguageTag::Auto, mode).await;
        let verdict = classifier.classify(sample.email).await;
        if verdict.mapped_category == sample.gold_sentiment {
            correct_sentiment += 1;
        }
        results.push(SampleResult {
            index: idx + 1,
            jaccard: (jaccard_similarity(&generated_summary, sample.gold_summary) * 100.0).round() / 100.0,
            generated_summary,
            gold_sentiment: sample.gold_sentiment,
            predicted_sentiment: verdict.mapped_category,
            sentiment_label: verdict.label,
            sentiment_score: verdict.score,
        });
    }

    EvaluationReport {
        results,
        correct_sentiment,
    }
}

const fn sample(email: &'static str, gold_summary: &'static str, gold_sentiment: SentimentCategory) -> Sample {
    Sample {
        email,
        gold_summary,
        gold_sentiment,
    }
}

use SentimentCategory::{Negative, Neutral, Positive};

/// Twenty labelled business e-mails.
pub const SAMPLES: &[Sample] = &[
    sample(
        "Hi John, Can you review the attached report by tomorrow? We need to send it to the client. Thanks! Regards, Alice",
        "Alice requests John to review the attached report by tomorrow for client submission.",
        Positive,
    ),
    sample(
        "Hello Team, I’m disappointed that the server was down last night for 3 hours. We lost many sales. Please address this ASAP. Thanks, Bob",
        "Bob reports server downtime of 3 hours, lost sales, and asks for immediate fix.",
        Negative,
    ),
    sample(
        "Dear all, Thank you for attending yesterday’s meeting. The minutes are attached. Let me know if you have corrections. Best, Carol",
        "Carol thanks attendees, shares attached meeting minutes, and asks for corrections.",
        Neutral,
    ),
    sample(
        "Hi, The Q1 sales numbers were excellent! We exceeded our target by 20%. Great work, team. Cheers, Diana",
        "Diana announces Q1 sales beat target by 20% and congratulates the team.",
        Positive,
    ),
    sample(
        "Team, Please note: The build failed on Jenkins again. We cannot deploy until this is fixed. Urgent. Regards, Ethan",
        "Ethan reports Jenkins build failure, blocking deployment, calls for urgent fix.",
        Negative,
    ),
    sample(
        "Hi! Please find the invoice for last month attached. Let me know if you need any clarifications. Thanks, Finance Dept",
        "Finance Dept sent last month’s invoice and invites questions.",
        Neutral,
    ),
    sample(
        "Dear Sarah, Congratulations on your promotion! We’re thrilled to have you lead the marketing team. Best wishes, CEO",
        "CEO congratulates Sarah on her promotion to lead marketing.",
        Positive,
    ),
    sample(
        "Hello, There will be a maintenance window this Saturday from 2 AM to 4 AM. Services may be unavailable. Apologies for inconvenience. IT Team",
        "IT Team announces Saturday maintenance window (2–4 AM) and warns of downtime.",
        Neutral,
    ),
    sample(
        "Good afternoon, The office will be closed next Monday for a public holiday. Normal business resumes Tuesday. Regards, HR",
        "HR notifies that the office is closed next Monday for holiday; business resumes Tuesday.",
        Neutral,
    ),
    sample(
        "Hi Team, We have a new security vulnerability reported. Please patch the servers by end of day. Urgent. Security Team",
        "Security Team reports new vulnerability and demands server patch by end of day.",
        Negative,
    ),
    sample(
        "Dear All, Congratulations! Our paper was accepted at the IEEE conference next month. Let's prepare slides. Cheers, Alice",
        "Alice announces paper acceptance to IEEE conference and reminds team to prepare slides.",
        Positive,
    ),
    sample(
        "Hello John, I am currently out of office until Friday. For urgent matters, contact Jane. Best, Michael",
        "Michael is out of office until Friday and directs urgent issues to Jane.",
        Neutral,
    ),
    sample(
        "Team, We missed our monthly KPI targets again. Sales dropped by 10%. We must come up with a new strategy. Regards, Director",
        "Director laments missing KPI targets, notes 10% sales drop, and calls for new strategy.",
        Negative,
    ),
    sample(
        "Hi Mary, Thank you for the comprehensive handover document. I’ll review it tonight and get back to you. Best, Tom",
        "Tom thanks Mary for handover document and promises to review it tonight.",
        Positive,
    ),
    sample(
        "Dear Vendor, We did not receive the shipment you promised last week. This delay is unacceptable. Please respond by EOD. Sincerely, Ops",
        "Ops complains vendor shipment is overdue, deems delay unacceptable, and demands response by EOD.",
        Negative,
    ),
    sample(
        "Greetings, We will have a team‐building event this Friday in the conference room. Bring your ideas for activities. Cheers, Event Coordinator",
        "Event Coordinator announces Friday team-building event in conference room and asks for activity ideas.",
        Positive,
    ),
    sample(
        "Hi Sam, I noticed several typos in the last presentation deck. Can you correct them before tomorrow’s client call? Regards, QA Lead",
        "QA Lead points out typos in presentation deck and asks Sam to correct before tomorrow’s client call.",
        Neutral,
    ),
    sample(
        "Team, The customer escalated due to slow response on ticket #1234. We need to prioritize this now. Thanks, Support Lead",
        "Support Lead reports customer escalation on ticket #1234 and instructs team to prioritize it immediately.",
        Negative,
    ),
    sample(
        "Hello, Our annual performance reviews are next week. Please submit your self‐evaluation by Wednesday. HR Team",
        "HR Team informs that annual performance reviews are next week and asks for self‐evaluations by Wednesday.",
        Neutral,
    ),
    sample(
        "Hi, FYI, the DevOps script now auto‐restarts the server if it crashes. No manual intervention needed. Cheers, DevOps",
        "DevOps announces new script auto‐restarts server on crash, eliminating need for manual intervention.",
        Positive,
    ),
];
