//! Golden checks for rendered reviewer prompts.
//!
//! Each case renders the built-in templates with a realistic context and
//! checks that the right material reaches the model and no placeholder is
//! left behind. Nothing here calls a model.

use scenemind_llm::prompt::{self, unfilled_placeholders, ReviewTemplates};

struct GoldenCase {
    name: &'static str,
    vars: Vec<(&'static str, &'static str)>,
    system_must_contain: Vec<&'static str>,
    user_must_contain: Vec<&'static str>,
    must_not_contain: Vec<&'static str>,
}

fn full_vars(overrides: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
    let mut vars = vec![
        ("persona_prompt", "You have read scripts for twenty years."),
        ("reviewer_name", "Margaret"),
        ("reviewer_type", "professional script reader"),
        ("priorities", "plot, pacing"),
        ("feedback_style", "blunt"),
        ("title", "The Lighthouse"),
        ("recent_scenes", prompt::NOTHING_YET),
        ("earlier_scenes", prompt::NOTHING_YET),
        ("key_characters", prompt::NOTHING_YET),
        ("open_questions", prompt::NOTHING_YET),
        ("feelings", prompt::NOTHING_YET),
        ("scene_number", "1"),
        ("scene_heading", "INT. LIGHTHOUSE - NIGHT"),
        ("scene_text", "The lamp turns. ELENA climbs the stairs."),
    ];
    for (key, value) in overrides {
        if let Some(slot) = vars.iter_mut().find(|(k, _)| k == key) {
            slot.1 = *value;
        }
    }
    vars
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        // ---------------------------------------------------------------
        // 1. Opening scene: every memory section is empty
        // ---------------------------------------------------------------
        GoldenCase {
            name: "opening_scene_reader",
            vars: full_vars(&[]),
            system_must_contain: vec!["Margaret", "professional script reader", "plot, pacing", "valid JSON"],
            user_must_contain: vec![
                "SCREENPLAY: The Lighthouse",
                "RECENT SCENES YOU REMEMBER:\n(nothing yet)",
                "NOW YOU'RE READING (Scene 1: INT. LIGHTHOUSE - NIGHT)",
                "ELENA climbs",
                "\"questions_raised\"",
            ],
            must_not_contain: vec!["TODO"],
        },
        // ---------------------------------------------------------------
        // 2. Deep into the script: digests, questions and affect present
        // ---------------------------------------------------------------
        GoldenCase {
            name: "midpoint_with_memory",
            vars: full_vars(&[
                ("scene_number", "14"),
                ("scene_heading", "EXT. CLIFF - DAWN"),
                ("recent_scenes", "Scene 12 (INT. KITCHEN - DAY): Sam burns the letter.\nScene 13 (EXT. PIER - DUSK): Elena waits."),
                ("earlier_scenes", "Scene 3: Elena finds the LETTER [discovery]"),
                ("key_characters", "- ELENA (protagonist, high)\n- OLD SAM (supporting, medium)"),
                ("open_questions", "- [Q_002] Who wrote the letter? (critical, raised in scene 3)"),
                ("feelings", "Scene 13: engagement 0.8, enjoyment 0.6, \"Tense.\""),
            ]),
            system_must_contain: vec!["Margaret"],
            user_must_contain: vec![
                "Scene 12 (INT. KITCHEN - DAY)",
                "[discovery]",
                "ELENA (protagonist, high)",
                "[Q_002] Who wrote the letter?",
                "engagement 0.8",
                "Scene 14: EXT. CLIFF - DAWN",
            ],
            must_not_contain: vec!["(nothing yet)"],
        },
        // ---------------------------------------------------------------
        // 3. Casual viewer persona
        // ---------------------------------------------------------------
        GoldenCase {
            name: "casual_viewer_persona",
            vars: full_vars(&[
                ("persona_prompt", "You watch movies on Friday nights and hate being bored."),
                ("reviewer_name", "Jake"),
                ("reviewer_type", "casual viewer"),
                ("priorities", "emotional impact, dialogue"),
                ("feedback_style", "casual"),
            ]),
            system_must_contain: vec!["Jake", "casual viewer", "Friday nights", "emotional impact, dialogue"],
            user_must_contain: vec!["RESPOND WITH:"],
            must_not_contain: vec!["Margaret"],
        },
    ]
}

#[test]
fn golden_prompts_render_cleanly() {
    let templates = ReviewTemplates::builtin();
    for case in golden_cases() {
        let (system, user) = templates.render(&case.vars);
        for needle in &case.system_must_contain {
            assert!(system.contains(needle), "[{}] system prompt missing {needle:?}", case.name);
        }
        for needle in &case.user_must_contain {
            assert!(user.contains(needle), "[{}] user prompt missing {needle:?}", case.name);
        }
        for needle in &case.must_not_contain {
            assert!(
                !system.contains(needle) && !user.contains(needle),
                "[{}] prompt unexpectedly contains {needle:?}",
                case.name
            );
        }
        assert!(unfilled_placeholders(&system).is_empty(), "[{}] system: {:?}", case.name, unfilled_placeholders(&system));
        assert!(unfilled_placeholders(&user).is_empty(), "[{}] user: {:?}", case.name, unfilled_placeholders(&user));
    }
}

#[test]
fn sections_appear_in_reading_order() {
    let (_, user) = ReviewTemplates::builtin().render(&full_vars(&[]));
    let order = [
        "RECENT SCENES YOU REMEMBER",
        "EARLIER IN THE SCRIPT",
        "KEY CHARACTERS",
        "QUESTIONS YOU'RE WONDERING ABOUT",
        "HOW YOU'VE BEEN FEELING",
        "NOW YOU'RE READING",
        "RESPOND WITH",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|h| user.find(h).unwrap_or_else(|| panic!("missing {h}")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}
