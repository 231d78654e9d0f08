use super::{Question, Topic};

struct TopicDef {
    id: &'static str,
    lesson_id: &'static str,
    title: &'static str,
    bullets: [&'static str; 4],
    quiz: [(&'static str, [&'static str; 3], usize); 10],
}

const TOPICS: [TopicDef; 3] = [
    TopicDef {
        id: "suspicious_link",
        lesson_id: "LESSON_SUSP_LINK_001",
        title: "Identifying Suspicious Links",
        bullets: [
            "Hover over links to check destination URLs",
            "Watch for misspelled domain names",
            "Avoid shortened URLs from unknown services",
            "Verify links before clicking",
        ],
        quiz: [
            ("What should you do before clicking a suspicious link?", ["hover", "click", "ignore"], 0),
            ("Misspelled domains are a warning sign?", ["true", "false", "maybe"], 0),
            ("Shortened URLs are always safe?", ["yes", "no", "sometimes"], 1),
            ("IP addresses in links are suspicious?", ["yes", "no", "rarely"], 0),
            ("Always verify links through official channels?", ["yes", "no", "optional"], 0),
            ("HTTP links are safer than HTTPS?", ["yes", "no", "same"], 1),
            ("Links in unexpected emails need verification?", ["yes", "no", "maybe"], 0),
            ("Similar-looking domains are safe?", ["yes", "no", "usually"], 1),
            ("Type important URLs directly instead of clicking?", ["yes", "no", "depends"], 0),
            ("When in doubt, verify the sender?", ["yes", "no", "optional"], 0),
        ],
    },
    TopicDef {
        id: "abnormal_email",
        lesson_id: "LESSON_ABN_EMAIL_002",
        title: "Recognizing Abnormal Email Patterns",
        bullets: [
            "Check sender address matches display name",
            "Watch for poor grammar and spelling errors",
            "Be suspicious of urgent unexpected requests",
            "Verify emails through alternative channels",
        ],
        quiz: [
            ("Sender address should match display name?", ["yes", "no", "maybe"], 0),
            ("Poor grammar in professional emails is normal?", ["yes", "no", "sometimes"], 1),
            ("Generic greetings are suspicious?", ["yes", "no", "rarely"], 0),
            ("Inconsistent branding is a red flag?", ["yes", "no", "maybe"], 0),
            ("Unexpected urgent emails need verification?", ["yes", "no", "optional"], 0),
            ("Reply-to address differences are normal?", ["yes", "no", "sometimes"], 1),
            ("Check email headers for routing info?", ["yes", "no", "optional"], 0),
            ("Report suspicious emails to IT security?", ["yes", "no", "maybe"], 0),
            ("Contact sender through alternative channels?", ["yes", "no", "depends"], 0),
            ("Unusual timing is suspicious?", ["yes", "no", "rarely"], 0),
        ],
    },
    TopicDef {
        id: "random_email_address",
        lesson_id: "LESSON_RAND_EMAIL_003",
        title: "Dealing with Suspicious Email Addresses",
        bullets: [
            "Verify addresses match organization's official domain",
            "Be skeptical of random character combinations",
            "Watch for similar-looking domains with misspellings",
            "Check official website for legitimate contact addresses",
        ],
        quiz: [
            ("Random character combinations are suspicious?", ["yes", "no", "maybe"], 0),
            ("Personal emails claiming to be businesses are safe?", ["yes", "no", "sometimes"], 1),
            ("Similar-looking domains need verification?", ["yes", "no", "optional"], 0),
            ("Business emails from free services are normal?", ["yes", "no", "rarely"], 1),
            ("Check organization's official website for addresses?", ["yes", "no", "optional"], 0),
            ("Misspelled domains are safe?", ["yes", "no", "sometimes"], 1),
            ("Numbers before @ symbol in business emails are normal?", ["yes", "no", "rarely"], 1),
            ("Never respond to unverified addresses?", ["yes", "no", "maybe"], 0),
            ("Report suspicious addresses to email providers?", ["yes", "no", "optional"], 0),
            ("When unsure, contact through official website?", ["yes", "no", "depends"], 0),
        ],
    },
];

/// Build the owned topic list from the static tables.
pub fn topics() -> Vec<Topic> {
    TOPICS
        .iter()
        .map(|def| Topic {
            id: def.id.to_string(),
            lesson_id: def.lesson_id.to_string(),
            title: def.title.to_string(),
            bullets: def.bullets.iter().map(|b| b.to_string()).collect(),
            questions: def
                .quiz
                .iter()
                .map(|(text, options, answer)| Question::new(*text, options, *answer))
                .collect(),
        })
        .collect()
}
