use std::sync::{Arc, Barrier};
use std::thread;

use super::*;
use crate::ledger::SubmitReview;
use crate::testing::{self, Fixture};

struct Tasting {
    fx: Fixture,
    host: i32,
    guest: i32,
    drinks: Vec<i32>,
    session: TastingSession,
}

/// A draft session hosted by Alex with `drinks` drinks, joined by Robin.
fn tasting(max_rounds: i32, drinks: usize) -> Tasting {
    tasting_on(testing::fixture(), max_rounds, drinks)
}

fn tasting_on(fx: Fixture, max_rounds: i32, drinks: usize) -> Tasting {
    let host = fx.user("Alex");
    let guest = fx.user("Robin");
    let drinks: Vec<i32> = (0..drinks).map(|n| fx.drink(&format!("Drink {}", n + 1))).collect();

    let session = fx
        .service
        .run(&CreateSession {
            host_id: host,
            name: "Friday tasting".into(),
            description: Some("  Belgian ales  ".into()),
            max_rounds,
            drink_ids: drinks.clone(),
        })
        .unwrap();

    fx.service
        .run(&JoinSession {
            invite_code: session.invite_code.clone(),
            user_id: guest,
        })
        .unwrap();
    fx.broker.clear();

    Tasting {
        fx,
        host,
        guest,
        drinks,
        session,
    }
}

impl Tasting {
    fn start(&self) -> TastingSession {
        self.fx
            .service
            .run(&StartSession {
                session_id: self.session.id,
                actor: self.host,
            })
            .unwrap()
    }

    fn advance(&self) -> Result<Advanced> {
        self.fx.service.run(&AdvanceRound {
            session_id: self.session.id,
            actor: self.host,
            from_round: None,
        })
    }

    fn reload(&self) -> TastingSession {
        db::find_session(&mut self.fx.conn(), self.session.id).unwrap()
    }

    fn round(&self, number: i32) -> TastingRound {
        db::find_round_by_number(&mut self.fx.conn(), self.session.id, number)
            .unwrap()
            .unwrap()
    }

    fn review(&self, round_number: i32, user_id: i32, rating: i32) -> Result<ReviewWithUser> {
        self.fx.service.run(&SubmitReview {
            round_id: self.round(round_number).id,
            user_id,
            rating,
            review: None,
            tags: Vec::new(),
        })
    }

    fn show(&self, viewer: i32) -> SessionDetails {
        self.fx
            .service
            .query(&ShowSession {
                session_id: self.session.id,
                viewer,
            })
            .unwrap()
    }
}

/** Create **/

#[test]
fn create_lays_out_one_pending_round_per_drink() {
    let t = tasting(3, 2);

    assert_eq!(t.session.status, SessionStatus::Draft);
    assert_eq!(t.session.current_round, 0);
    assert_eq!(t.session.max_rounds, 3);
    assert_eq!(t.session.description.as_deref(), Some("Belgian ales"));
    assert!(invite::normalize(&t.session.invite_code).is_ok());

    let details = t.show(t.host);
    let rounds: Vec<(i32, i32, RoundStatus)> = details
        .rounds
        .iter()
        .map(|r| (r.round.round_number, r.round.drink_id, r.round.status))
        .collect();
    assert_eq!(
        rounds,
        vec![
            (1, t.drinks[0], RoundStatus::Pending),
            (2, t.drinks[1], RoundStatus::Pending),
        ]
    );

    let host = db::find_participant(&mut t.fx.conn(), t.session.id, t.host)
        .unwrap()
        .unwrap();
    assert_eq!(host.role, ParticipantRole::Host);
}

#[test]
fn drinks_beyond_max_rounds_are_dropped() {
    let t = tasting(2, 3);

    assert_eq!(t.show(t.host).rounds.len(), 2);
    assert!(db::find_round_by_number(&mut t.fx.conn(), t.session.id, 3)
        .unwrap()
        .is_none());
}

#[test]
fn create_publishes_nothing() {
    let fx = testing::fixture();
    let host = fx.user("Alex");
    let drink = fx.drink("Saison");

    fx.service
        .run(&CreateSession {
            host_id: host,
            name: "Quiet".into(),
            description: None,
            max_rounds: 1,
            drink_ids: vec![drink],
        })
        .unwrap();

    assert!(fx.broker.published().is_empty());
}

#[test]
fn create_rejects_bad_input() {
    let fx = testing::fixture();
    let host = fx.user("Alex");
    let drink = fx.drink("Saison");

    let command = |max_rounds: i32, drink_ids: Vec<i32>| CreateSession {
        host_id: host,
        name: "Tasting".into(),
        description: None,
        max_rounds,
        drink_ids,
    };

    for bad in vec![
        command(0, vec![drink]),
        command(MAX_ROUNDS + 1, vec![drink]),
        command(2, Vec::new()),
        command(2, vec![drink, drink + 100]),
        CreateSession {
            name: "   ".into(),
            ..command(2, vec![drink])
        },
    ] {
        let err = fx.service.run(&bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{:?} gave {}", bad, err);
    }

    let err = fx
        .service
        .run(&CreateSession {
            host_id: host + 100,
            ..command(1, vec![drink])
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound("user")));

    let sessions: i64 = tasting_sessions::table
        .count()
        .get_result(&mut fx.conn())
        .unwrap();
    assert_eq!(sessions, 0);
}

/** Join **/

#[test]
fn joining_twice_keeps_one_membership() {
    let t = tasting(2, 2);
    let late = t.fx.user("Sam");
    let join = JoinSession {
        invite_code: t.session.invite_code.to_lowercase(),
        user_id: late,
    };

    let first = t.fx.service.run(&join).unwrap();
    let second = t.fx.service.run(&join).unwrap();

    assert!(matches!(first, JoinOutcome::Joined(_)));
    assert!(matches!(second, JoinOutcome::AlreadyJoined(_)));
    assert_eq!(first.participant(), second.participant());
    assert_eq!(first.participant().participant.role, ParticipantRole::Participant);
    assert_eq!(db::count_participants(&mut t.fx.conn(), t.session.id).unwrap(), 3);

    let published = t.fx.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event, "participant.joined");
    assert_eq!(published[0].payload["participant"]["user"]["name"], "Sam");
    assert_eq!(published[0].payload["message"], "Sam joined the tasting!");
}

#[test]
fn host_joining_is_already_joined() {
    let t = tasting(1, 1);

    let outcome = t
        .fx
        .service
        .run(&JoinSession {
            invite_code: t.session.invite_code.clone(),
            user_id: t.host,
        })
        .unwrap();

    assert!(matches!(outcome, JoinOutcome::AlreadyJoined(_)));
    assert!(outcome.participant().participant.is_host());
    assert!(t.fx.broker.published().is_empty());
}

#[test]
fn joining_an_active_session_is_allowed() {
    let t = tasting(2, 2);
    t.start();
    let late = t.fx.user("Sam");

    let outcome = t
        .fx
        .service
        .run(&JoinSession {
            invite_code: t.session.invite_code.clone(),
            user_id: late,
        })
        .unwrap();

    assert!(matches!(outcome, JoinOutcome::Joined(_)));
}

#[test]
fn unknown_or_closed_sessions_cannot_be_joined() {
    let t = tasting(1, 1);
    let late = t.fx.user("Sam");

    let unknown = if t.session.invite_code == "ZZZZ9999" { "YYYY8888" } else { "ZZZZ9999" };
    let err = t
        .fx
        .service
        .run(&JoinSession {
            invite_code: unknown.into(),
            user_id: late,
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound("session")));

    t.start();
    t.advance().unwrap();

    let err = t
        .fx
        .service
        .run(&JoinSession {
            invite_code: t.session.invite_code.clone(),
            user_id: late,
        })
        .unwrap_err();
    assert!(matches!(err, Error::SessionClosed(id) if id == t.session.id));
    assert!(db::find_participant(&mut t.fx.conn(), t.session.id, late)
        .unwrap()
        .is_none());
}

/** Start **/

#[test]
fn start_activates_the_session_and_its_first_round() {
    let t = tasting(3, 2);

    let started = t.start();

    assert_eq!(started.status, SessionStatus::Active);
    assert_eq!(started.current_round, 1);
    assert!(started.starts_at.is_some());

    let first = t.round(1);
    assert_eq!(first.status, RoundStatus::Active);
    assert!(first.started_at.is_some());
    assert_eq!(t.round(2).status, RoundStatus::Pending);
}

#[test]
fn start_announces_the_session_before_the_round() {
    let t = tasting(3, 2);
    t.start();

    let published = t.fx.broker.published();
    assert_eq!(
        t.fx.broker.names(),
        vec!["session.status.changed", "round.status.changed"]
    );

    let session = &published[0].payload;
    assert_eq!(session["previousStatus"], "draft");
    assert_eq!(session["session"]["status"], "active");
    assert_eq!(session["session"]["participants"].as_array().unwrap().len(), 2);
    assert_eq!(session["message"], "The tasting has started!");

    let round = &published[1].payload;
    assert_eq!(round["previousStatus"], "pending");
    assert_eq!(round["round"]["round_number"], 1);
    assert_eq!(round["round"]["drink"]["name"], "Drink 1");
    // The snapshot is the committed state, not the state before the command.
    assert_eq!(round["session"]["status"], "active");
    assert_eq!(round["session"]["current_round"], 1);

    for envelope in &published {
        assert_eq!(envelope.channel, format!("tasting-session.{}", t.session.id));
    }
}

#[test]
fn start_succeeds_exactly_once() {
    let t = tasting(2, 2);
    t.start();
    t.fx.broker.clear();

    let err = t
        .fx
        .service
        .run(&StartSession {
            session_id: t.session.id,
            actor: t.guest,
        })
        .unwrap_err();

    assert!(matches!(err, Error::InvalidTransition(_)));
    assert!(t.fx.broker.published().is_empty());
    assert_eq!(t.reload().current_round, 1);
}

#[test]
fn outsiders_cannot_drive_a_session() {
    let t = tasting(2, 2);
    let outsider = t.fx.user("Eve");

    let err = t
        .fx
        .service
        .run(&StartSession {
            session_id: t.session.id,
            actor: outsider,
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotAParticipant { .. }));

    t.start();
    let err = t
        .fx
        .service
        .run(&AdvanceRound {
            session_id: t.session.id,
            actor: outsider,
            from_round: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotAParticipant { .. }));
    assert_eq!(t.reload().current_round, 1);
}

#[test]
fn unknown_sessions_are_not_found() {
    let t = tasting(1, 1);

    let err = t
        .fx
        .service
        .run(&StartSession {
            session_id: t.session.id + 1,
            actor: t.host,
        })
        .unwrap_err();

    assert!(matches!(err, Error::NotFound("session")));
}

/** Advance **/

#[test]
fn draft_sessions_cannot_advance() {
    let t = tasting(2, 2);

    assert!(matches!(t.advance(), Err(Error::InvalidTransition(_))));
    assert_eq!(t.reload().current_round, 0);
}

#[test]
fn advancing_walks_the_rounds_then_completes() {
    let t = tasting(2, 2);
    t.start();
    t.fx.broker.clear();

    match t.advance().unwrap() {
        Advanced::NextRound { session, round } => {
            assert_eq!(session.current_round, 2);
            assert_eq!(round.unwrap().status, RoundStatus::Active);
        }
        other => panic!("expected the next round, got {:?}", other),
    }
    assert_eq!(t.round(1).status, RoundStatus::Completed);
    assert!(t.round(1).completed_at.is_some());

    let published = t.fx.broker.published();
    assert_eq!(
        t.fx.broker.names(),
        vec!["round.status.changed", "round.status.changed"]
    );
    assert_eq!(published[0].payload["round"]["round_number"], 1);
    assert_eq!(published[0].payload["round"]["status"], "completed");
    assert_eq!(published[0].payload["message"], "Round 1 is finished!");
    assert_eq!(published[1].payload["round"]["round_number"], 2);
    assert_eq!(published[1].payload["message"], "Round 2 has started!");
    t.fx.broker.clear();

    let completed = t.advance().unwrap();
    assert!(matches!(completed, Advanced::Completed { .. }));
    assert_eq!(completed.session().status, SessionStatus::Completed);
    assert_eq!(completed.session().current_round, 2);
    assert!(completed.session().ends_at.is_some());

    // Completing the session leaves the last round alone.
    assert_eq!(t.round(2).status, RoundStatus::Active);

    let published = t.fx.broker.published();
    assert_eq!(t.fx.broker.names(), vec!["session.status.changed"]);
    assert_eq!(published[0].payload["previousStatus"], "active");
    assert_eq!(
        published[0].payload["message"],
        "The tasting is finished! Check out the results."
    );

    assert!(matches!(t.advance(), Err(Error::InvalidTransition(_))));
    assert!(t.reload().current_round <= t.reload().max_rounds);
}

#[test]
fn rounds_without_a_drink_are_skipped_over() {
    let t = tasting(3, 2);
    t.start();
    t.advance().unwrap();
    t.fx.broker.clear();

    match t.advance().unwrap() {
        Advanced::NextRound { session, round } => {
            assert_eq!(session.current_round, 3);
            assert!(round.is_none());
        }
        other => panic!("expected the next round, got {:?}", other),
    }
    assert_eq!(t.round(2).status, RoundStatus::Completed);
    assert_eq!(t.fx.broker.names(), vec!["round.status.changed"]);

    assert!(matches!(t.advance().unwrap(), Advanced::Completed { .. }));
    assert_eq!(t.reload().current_round, 3);
}

#[test]
fn stale_advances_are_rejected() {
    let t = tasting(3, 3);
    t.start();

    let err = t
        .fx
        .service
        .run(&AdvanceRound {
            session_id: t.session.id,
            actor: t.guest,
            from_round: Some(2),
        })
        .unwrap_err();

    assert!(matches!(err, Error::InvalidTransition(_)));
    assert_eq!(t.reload().current_round, 1);
}

#[test]
fn racing_advances_move_exactly_one_round() {
    let t = tasting(3, 3);
    t.start();
    t.fx.broker.clear();

    let handles: Vec<_> = [t.host, t.guest]
        .iter()
        .map(|&actor| {
            let service = t.fx.service.clone();
            let session_id = t.session.id;
            thread::spawn(move || {
                service.run(&AdvanceRound {
                    session_id,
                    actor,
                    from_round: Some(1),
                })
            })
        })
        .collect();

    let results: Vec<Result<Advanced>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::InvalidTransition(_)))));

    assert_eq!(t.reload().current_round, 2);
    assert_eq!(t.round(2).status, RoundStatus::Active);
    assert_eq!(t.round(3).status, RoundStatus::Pending);
    assert_eq!(t.fx.broker.published().len(), 2);
}

#[test]
fn contended_advances_on_a_shared_database_move_exactly_one_round() {
    let t = tasting_on(testing::shared_fixture(4), 3, 3);
    t.start();
    t.fx.broker.clear();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let service = t.fx.service.clone();
            let barrier = barrier.clone();
            let session_id = t.session.id;
            let actor = if n % 2 == 0 { t.host } else { t.guest };
            thread::spawn(move || {
                barrier.wait();
                service.run(&AdvanceRound {
                    session_id,
                    actor,
                    from_round: Some(1),
                })
            })
        })
        .collect();

    let results: Vec<Result<Advanced>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::InvalidTransition(_))))
            .count(),
        7
    );

    assert_eq!(t.reload().current_round, 2);
    assert_eq!(t.round(1).status, RoundStatus::Completed);
    assert_eq!(t.round(2).status, RoundStatus::Active);
    assert_eq!(t.round(3).status, RoundStatus::Pending);
    assert_eq!(t.fx.broker.published().len(), 2);
}

/** Reviews **/

#[test]
fn pending_rounds_cannot_be_reviewed() {
    let t = tasting(2, 2);

    assert!(matches!(t.review(1, t.host, 4), Err(Error::RoundNotActive(_))));

    t.start();
    assert!(matches!(t.review(2, t.host, 4), Err(Error::RoundNotActive(_))));
}

#[test]
fn completed_rounds_cannot_be_reviewed() {
    let t = tasting(2, 2);
    t.start();
    t.advance().unwrap();

    assert!(matches!(t.review(1, t.guest, 4), Err(Error::RoundNotActive(_))));
}

#[test]
fn only_participants_may_review() {
    let t = tasting(2, 2);
    t.start();
    t.fx.broker.clear();
    let outsider = t.fx.user("Eve");

    assert!(matches!(
        t.review(1, outsider, 4),
        Err(Error::NotAParticipant { .. })
    ));
    assert!(matches!(t.review(1, t.guest, 6), Err(Error::Validation(_))));
    assert!(matches!(t.review(1, t.guest, 0), Err(Error::Validation(_))));

    let unknown_round = SubmitReview {
        round_id: t.round(2).id + 100,
        user_id: t.guest,
        rating: 3,
        review: None,
        tags: Vec::new(),
    };
    assert!(matches!(
        t.fx.service.run(&unknown_round),
        Err(Error::NotFound("round"))
    ));
    assert!(t.fx.broker.published().is_empty());
}

#[test]
fn resubmitting_overwrites_and_the_average_follows() {
    let t = tasting(2, 2);
    t.start();
    let third = t.fx.user("Sam");
    t.fx.service
        .run(&JoinSession {
            invite_code: t.session.invite_code.clone(),
            user_id: third,
        })
        .unwrap();
    t.fx.broker.clear();

    let first = t.review(1, t.host, 5).unwrap();
    t.review(1, t.guest, 3).unwrap();
    t.review(1, third, 4).unwrap();

    let published = t.fx.broker.published();
    assert_eq!(published.len(), 3);
    assert_eq!(published[2].event, "review.submitted");
    assert_eq!(published[2].payload["round"]["average_rating"], 4.0);
    assert_eq!(published[2].payload["review"]["user"]["name"], "Sam");
    assert_eq!(published[2].payload["message"], "Sam submitted a review!");

    let again = t
        .fx
        .service
        .run(&SubmitReview {
            round_id: t.round(1).id,
            user_id: t.host,
            rating: 2,
            review: Some("Grew on me, then didn't".into()),
            tags: vec!["bitter".into()],
        })
        .unwrap();

    assert_eq!(again.review.id, first.review.id);
    assert_eq!(again.review.rating, 2);
    assert_eq!(again.review.review.as_deref(), Some("Grew on me, then didn't"));
    assert!(again.review.tags.0.contains("bitter"));

    let details = t.show(t.host);
    let round = &details.rounds[0];
    assert_eq!(round.reviews.len(), 3);
    assert_eq!(round.average_rating, 3.0);
    assert_eq!(
        ledger::round_average(&mut t.fx.conn(), round.round.id).unwrap(),
        3.0
    );
    assert_eq!(t.fx.broker.published()[3].payload["round"]["average_rating"], 3.0);
}

/** Reads **/

#[test]
fn results_rank_rounds_by_average() {
    let t = tasting(3, 3);

    let early = t.fx.service.query(&SessionResults {
        session_id: t.session.id,
    });
    assert!(matches!(early, Err(Error::InvalidTransition(_))));

    t.start();
    t.review(1, t.host, 3).unwrap();
    t.advance().unwrap();
    t.review(2, t.host, 5).unwrap();
    t.review(2, t.guest, 4).unwrap();
    t.advance().unwrap();
    t.review(3, t.guest, 3).unwrap();
    t.advance().unwrap();

    let results = t
        .fx
        .service
        .query(&SessionResults {
            session_id: t.session.id,
        })
        .unwrap();

    let ranking: Vec<(i32, f64, usize)> = results
        .iter()
        .map(|r| (r.round_number, r.average_rating, r.total_reviews))
        .collect();
    assert_eq!(ranking, vec![(2, 4.5, 2), (1, 3.0, 1), (3, 3.0, 1)]);
    assert_eq!(results[0].drink.id, t.drinks[1]);
}

#[test]
fn show_reports_membership_and_the_current_round() {
    let t = tasting(2, 2);
    let outsider = t.fx.user("Eve");

    let before = t.show(t.host);
    assert!(before.current_round.is_none());
    assert!(before.can_manage);

    t.start();

    let host = t.show(t.host);
    assert_eq!(host.session.host.name, "Alex");
    assert_eq!(host.session.participants.len(), 2);
    assert_eq!(host.current_round.unwrap().round.round_number, 1);

    let guest = t.show(t.guest);
    assert!(!guest.can_manage);
    assert_eq!(guest.membership.unwrap().user_id, t.guest);

    let stranger = t.show(outsider);
    assert!(stranger.membership.is_none());
    assert!(!stranger.can_manage);
}

#[test]
fn sessions_are_listed_for_hosts_and_participants() {
    let t = tasting(1, 1);
    let outsider = t.fx.user("Eve");
    let second = t
        .fx
        .service
        .run(&CreateSession {
            host_id: t.guest,
            name: "Robin's tasting".into(),
            description: None,
            max_rounds: 1,
            drink_ids: vec![t.drinks[0]],
        })
        .unwrap();

    let list = |user_id: i32| -> Vec<i32> {
        t.fx.service
            .query(&ListSessions { user_id, page: 1 })
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect()
    };

    assert_eq!(list(t.guest), vec![second.id, t.session.id]);
    assert_eq!(list(t.host), vec![t.session.id]);
    assert!(list(outsider).is_empty());

    let past_the_end = t
        .fx
        .service
        .query(&ListSessions {
            user_id: t.guest,
            page: 2,
        })
        .unwrap();
    assert!(past_the_end.is_empty());

    let out_of_range = t.fx.service.query(&ListSessions {
        user_id: t.guest,
        page: i64::MAX,
    });
    assert!(matches!(out_of_range, Err(Error::Validation(_))));
}

#[test]
fn channel_membership_follows_participation() {
    let t = tasting(1, 1);
    let outsider = t.fx.user("Eve");
    let pool = t.fx.service.pool();
    let param = t.session.id.to_string();

    assert!(is_channel_member(pool, t.host, &param));
    assert!(is_channel_member(pool, t.guest, &param));
    assert!(!is_channel_member(pool, outsider, &param));
    assert!(!is_channel_member(pool, t.host, "not-a-number"));
    assert!(!is_channel_member(pool, t.host, &(t.session.id + 1).to_string()));
}
