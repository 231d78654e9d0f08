use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::ServerEvent;
use super::rooms::Outbox;
use crate::bank::Topic;

/// Push a topic's lesson to `recipients` one bullet at a time, `pace` apart.
///
/// Runs as its own task and only talks to the outboxes it was handed.
/// Stops early once every recipient has gone away.
pub fn spawn_lesson(topic: &Topic, recipients: Vec<Outbox>, pace: Duration) -> JoinHandle<()> {
    let topic_id = topic.id.clone();
    let title = topic.title.clone();
    let bullets = topic.bullets.clone();

    tokio::spawn(async move {
        let mut recipients = recipients;

        deliver(
            &mut recipients,
            ServerEvent::Lesson {
                topic: topic_id.clone(),
                title,
                total_bullets: bullets.len(),
            },
        );

        for (index, text) in bullets.into_iter().enumerate() {
            if recipients.is_empty() {
                debug!(topic = %topic_id, "lesson recipients gone, stopping");
                return;
            }
            tokio::time::sleep(pace).await;
            deliver(
                &mut recipients,
                ServerEvent::LessonBullet {
                    topic: topic_id.clone(),
                    index,
                    text,
                },
            );
        }

        deliver(&mut recipients, ServerEvent::LessonDone { topic: topic_id });
    })
}

/// Send to every recipient without waiting, dropping the ones whose
/// connection closed or stopped draining its outbox.
fn deliver(recipients: &mut Vec<Outbox>, event: ServerEvent) {
    recipients.retain(|outbox| match outbox.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("lesson recipient outbox full, dropping it");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::QuestionBank;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn lesson_is_delivered_in_order() {
        let bank = QuestionBank::builtin();
        let topic = bank.get_topic("suspicious_link").unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        spawn_lesson(topic, vec![tx], Duration::from_millis(1))
            .await
            .unwrap();

        let ServerEvent::Lesson { total_bullets, .. } = rx.recv().await.unwrap() else {
            panic!("expected lesson header");
        };
        assert_eq!(total_bullets, topic.bullets.len());

        for expected in 0..topic.bullets.len() {
            match rx.recv().await.unwrap() {
                ServerEvent::LessonBullet { index, text, .. } => {
                    assert_eq!(index, expected);
                    assert_eq!(text, topic.bullets[expected]);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::LessonDone { .. }
        ));
    }

    #[tokio::test]
    async fn stalled_recipient_is_dropped_without_blocking_others() {
        let bank = QuestionBank::builtin();
        let topic = bank.get_topic("random_email_address").unwrap();
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        let (tx, mut rx) = mpsc::channel(16);

        let handle = spawn_lesson(topic, vec![stalled_tx, tx], Duration::from_millis(1));
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("lesson should not wait on a full outbox")
            .unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, topic.bullets.len() + 2);
    }

    #[tokio::test]
    async fn lesson_stops_when_recipient_is_gone() {
        let bank = QuestionBank::builtin();
        let topic = bank.get_topic("abnormal_email").unwrap();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let handle = spawn_lesson(topic, vec![tx], Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should stop without sleeping")
            .unwrap();
    }
}
