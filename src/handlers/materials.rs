use axum::{extract::State, http::StatusCode};
use uuid::Uuid;

use super::{
    assignments::{ClassFilter, listing_scope},
    required_text,
};
use crate::{
    AppState,
    access::{self, Operation},
    auth::Principal,
    error::{AppError, ErrorBody},
    extract::{Json, Path, Query},
    generation::{
        self, ConceptRequest, DEFAULT_ITEM_COUNT, DEFAULT_MAX_CONCEPTS, FlashcardRequest,
        QuizRequest,
    },
    models::{
        CreateMaterialRequest, FlashcardDeck, InlineContent, Material, MaterialContent,
        MaterialType, NewMaterial, Note, QuizContent,
    },
    repository::Repository,
};

/// The validated body of a material, ready to be written.
enum PreparedContent {
    Note(String),
    Quiz(QuizContent),
    Flashcards(FlashcardDeck),
}

#[utoipa::path(
    get,
    path = "/materials",
    params(ClassFilter),
    responses(
        (status = 200, description = "Visible materials", body = [Material]),
        (status = 403, description = "Not a member of the requested class", body = ErrorBody)
    )
)]
pub async fn list_materials(
    principal: Principal,
    State(state): State<AppState>,
    Query(filter): Query<ClassFilter>,
) -> Result<Json<Vec<Material>>, AppError> {
    let class_ids = listing_scope(&state, &principal, filter.class_id).await?;
    if class_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let mut materials = state.repo.list_materials(&class_ids).await?;
    materials.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(materials))
}

/// get_material
///
/// [Owner or member] A single material. NOTE materials come back with their note inlined.
#[utoipa::path(
    get,
    path = "/materials/{id}",
    params(("id" = Uuid, Path, description = "Material ID")),
    responses(
        (status = 200, description = "Found", body = Material),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_material(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Material>, AppError> {
    let mut material =
        access::authorize_material(state.repo.as_ref(), &principal, id, Operation::Read).await?;
    if let MaterialContent::Note { note_id, note } = &mut material.content {
        *note = state.repo.get_note(*note_id).await?;
    }
    Ok(Json(material))
}

/// delete_material
///
/// [Owner] Deletes the material; a NOTE material takes its note row with it.
#[utoipa::path(
    delete,
    path = "/materials/{id}",
    params(("id" = Uuid, Path, description = "Material ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_material(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    access::authorize_material(state.repo.as_ref(), &principal, id, Operation::Delete).await?;
    if state.repo.delete_material(id).await? {
        tracing::info!(material_id = %id, "material deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        // Lost a race with another delete.
        Err(AppError::not_found(format!("material {} not found", id)))
    }
}

/// create_material
///
/// [Owner] Creates a NOTE, QUIZ or FLASHCARDS material.
///
/// *Flow*:
/// 1. Validate and authorize; nothing is written on failure.
/// 2. QUIZ/FLASHCARDS without inline `content` are generated from `generate_from` first.
/// 3. NOTE writes the note, then the material. A failed material insert deletes the note.
/// 4. With `source_text_for_concepts`, concepts are extracted and stored. Any failure here
///    deletes the material (and its note) again.
///
/// Without `source_text_for_concepts` the adapter is never called for concepts and the
/// material is stored with `concepts: []`.
#[utoipa::path(
    post,
    path = "/materials",
    request_body = CreateMaterialRequest,
    responses(
        (status = 201, description = "Created", body = Material),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Not the class owner", body = ErrorBody),
        (status = 500, description = "Dependent write failed and was rolled back", body = ErrorBody),
        (status = 502, description = "Content generation failed", body = ErrorBody)
    )
)]
pub async fn create_material(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<CreateMaterialRequest>,
) -> Result<(StatusCode, Json<Material>), AppError> {
    let class = access::authorize_class_write(
        state.repo.as_ref(),
        &principal,
        payload.class_id,
        Operation::Write,
    )
    .await?;
    let title = required_text("title", &payload.title)?;
    let concept_source = match payload.source_text_for_concepts.as_deref() {
        Some(text) if text.trim().is_empty() => {
            return Err(AppError::validation("source_text_for_concepts must not be empty"));
        }
        other => other.map(str::to_string),
    };

    let prepared = prepare_content(&state, &payload).await?;

    let mut note = None;
    let content = match prepared {
        PreparedContent::Note(text) => {
            let created = state.repo.create_note(&title, &text).await?;
            let content = MaterialContent::Note {
                note_id: created.id,
                note: None,
            };
            note = Some(created);
            content
        }
        PreparedContent::Quiz(quiz) => MaterialContent::Quiz {
            questions: quiz.questions,
        },
        PreparedContent::Flashcards(deck) => MaterialContent::Flashcards { cards: deck.cards },
    };

    let new_material = NewMaterial {
        class_id: class.id,
        title,
        content,
        owner: class.owner,
    };
    let mut material = match state.repo.create_material(new_material).await {
        Ok(material) => material,
        Err(e) => {
            if let Some(orphan) = &note {
                discard_note(state.repo.as_ref(), orphan).await;
                return Err(AppError::DependencyWriteFailed(e.to_string()));
            }
            return Err(e.into());
        }
    };

    if let Some(source_text) = concept_source {
        let extracted = state
            .generator
            .extract_concepts(ConceptRequest {
                source_text,
                max_concepts: DEFAULT_MAX_CONCEPTS,
            })
            .await;
        let concepts = match extracted {
            Ok(concepts) => concepts,
            Err(e) => {
                discard_material(state.repo.as_ref(), &material).await;
                return Err(e.into());
            }
        };
        let failure = match state.repo.set_material_concepts(material.id, &concepts).await {
            Ok(true) => None,
            Ok(false) => Some(format!(
                "material {} vanished before its concepts were stored",
                material.id
            )),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            discard_material(state.repo.as_ref(), &material).await;
            return Err(AppError::DependencyWriteFailed(reason));
        }
        material.concepts = concepts;
    }

    if let MaterialContent::Note { note: slot, .. } = &mut material.content {
        *slot = note;
    }

    tracing::info!(
        material_id = %material.id,
        class_id = %material.class_id,
        kind = material.content.material_type().as_str(),
        "material created"
    );
    Ok((StatusCode::CREATED, Json(material)))
}

/// Checks the inline content against the declared type, or generates it. Runs before any
/// write so a generation failure leaves nothing behind.
async fn prepare_content(
    state: &AppState,
    payload: &CreateMaterialRequest,
) -> Result<PreparedContent, AppError> {
    let options = payload.generation.clone().unwrap_or_default();
    let count = options.count.unwrap_or(DEFAULT_ITEM_COUNT);

    match (payload.material_type, &payload.content) {
        (MaterialType::Note, Some(InlineContent::Text(text))) if !text.trim().is_empty() => {
            Ok(PreparedContent::Note(text.clone()))
        }
        (MaterialType::Note, _) => Err(AppError::validation(
            "NOTE materials need non-empty text content",
        )),
        (MaterialType::Quiz, Some(InlineContent::Quiz(quiz))) => generation::check_quiz(quiz.clone())
            .map(PreparedContent::Quiz)
            .map_err(|e| AppError::validation(e.to_string())),
        (MaterialType::Flashcards, Some(InlineContent::Flashcards(deck))) => {
            generation::check_deck(deck.clone())
                .map(PreparedContent::Flashcards)
                .map_err(|e| AppError::validation(e.to_string()))
        }
        (material_type, Some(_)) => Err(AppError::validation(format!(
            "content does not match material type {}",
            material_type.as_str()
        ))),
        (material_type, None) => {
            let source_text = payload.generate_from.clone().ok_or_else(|| {
                AppError::validation(format!(
                    "{} materials need content or generate_from",
                    material_type.as_str()
                ))
            })?;
            generation::validate_request(&source_text, count)?;
            if material_type == MaterialType::Quiz {
                let quiz = state
                    .generator
                    .generate_quiz(QuizRequest {
                        source_text,
                        count,
                        difficulty: options.difficulty,
                    })
                    .await?;
                Ok(PreparedContent::Quiz(quiz))
            } else {
                let deck = state
                    .generator
                    .generate_flashcards(FlashcardRequest {
                        source_text,
                        count,
                        style: options.style,
                    })
                    .await?;
                Ok(PreparedContent::Flashcards(deck))
            }
        }
    }
}

/// Best-effort removal of a note whose material was never written.
async fn discard_note(repo: &dyn Repository, note: &Note) {
    if let Err(e) = repo.delete_note(note.id).await {
        tracing::error!(note_id = %note.id, "compensation failed, note left behind: {}", e);
    }
}

/// Best-effort removal of a material (and its note) after a later step failed.
async fn discard_material(repo: &dyn Repository, material: &Material) {
    if let Err(e) = repo.delete_material(material.id).await {
        tracing::error!(
            material_id = %material.id,
            "compensation failed, material left behind: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockContentGenerator;
    use crate::models::{Class, Flashcard, QuizQuestion};
    use crate::test_support::TestApp;

    fn note_request(class: &Class, concepts: Option<&str>) -> CreateMaterialRequest {
        CreateMaterialRequest {
            class_id: class.id,
            title: "Photosynthesis".into(),
            material_type: MaterialType::Note,
            content: Some(InlineContent::Text("Light becomes chemical energy.".into())),
            generate_from: None,
            generation: None,
            source_text_for_concepts: concepts.map(str::to_string),
        }
    }

    fn quiz_request(class: &Class) -> CreateMaterialRequest {
        CreateMaterialRequest {
            class_id: class.id,
            title: "Quick check".into(),
            material_type: MaterialType::Quiz,
            content: Some(InlineContent::Quiz(QuizContent {
                questions: vec![QuizQuestion {
                    question: "Where does photosynthesis happen?".into(),
                    options: vec!["Chloroplast".into(), "Nucleus".into()],
                    answer_index: 0,
                    explanation: None,
                }],
            })),
            generate_from: None,
            generation: None,
            source_text_for_concepts: None,
        }
    }

    #[tokio::test]
    async fn test_inline_quiz_without_concept_source_skips_adapter() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let (status, Json(material)) =
            create_material(owner.into(), State(app.state()), Json(quiz_request(&class)))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert!(material.concepts.is_empty());
        assert_eq!(material.content.material_type(), MaterialType::Quiz);
        assert_eq!(app.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_note_material_with_concepts() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let (_, Json(material)) = create_material(
            owner.into(),
            State(app.state()),
            Json(note_request(&class, Some("chlorophyll absorbs light energy"))),
        )
        .await
        .unwrap();

        assert!(!material.concepts.is_empty());
        assert_eq!(app.generator.call_count(), 1);
        match &material.content {
            MaterialContent::Note { note: Some(note), .. } => {
                assert_eq!(note.content, "Light becomes chemical energy.")
            }
            other => panic!("expected an inlined note, got {:?}", other),
        }
        assert_eq!(app.repo.note_count(), 1);
    }

    #[tokio::test]
    async fn test_concept_failure_rolls_back_material_and_note() {
        let app = TestApp::with_generator(MockContentGenerator::new_failing());
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let result = create_material(
            owner.into(),
            State(app.state()),
            Json(note_request(&class, Some("chlorophyll"))),
        )
        .await;

        assert!(matches!(result, Err(AppError::GenerationFailed(_))));
        assert_eq!(app.repo.material_count(), 0);
        assert_eq!(app.repo.note_count(), 0);
    }

    #[tokio::test]
    async fn test_material_insert_failure_removes_note() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;
        app.repo.fail_material_inserts(true);

        let result =
            create_material(owner.into(), State(app.state()), Json(note_request(&class, None))).await;

        assert!(matches!(result, Err(AppError::DependencyWriteFailed(_))));
        assert_eq!(app.repo.note_count(), 0);
    }

    #[tokio::test]
    async fn test_concept_write_failure_rolls_back() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;
        app.repo.fail_concept_writes(true);

        let result = create_material(
            owner.into(),
            State(app.state()),
            Json(note_request(&class, Some("stomata regulate gas exchange"))),
        )
        .await;

        assert!(matches!(result, Err(AppError::DependencyWriteFailed(_))));
        assert_eq!(app.repo.material_count(), 0);
        assert_eq!(app.repo.note_count(), 0);
    }

    #[tokio::test]
    async fn test_material_removed_before_concept_write_is_a_failure() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;
        app.repo.remove_materials_before_concept_writes(true);

        let result = create_material(
            owner.into(),
            State(app.state()),
            Json(note_request(&class, Some("stomata regulate gas exchange"))),
        )
        .await;

        assert!(matches!(result, Err(AppError::DependencyWriteFailed(_))));
        assert_eq!(app.repo.material_count(), 0);
        assert_eq!(app.repo.note_count(), 0);
    }

    #[tokio::test]
    async fn test_flashcards_generated_when_content_absent() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let request = CreateMaterialRequest {
            class_id: class.id,
            title: "Cell vocabulary".into(),
            material_type: MaterialType::Flashcards,
            content: None,
            generate_from: Some("Mitochondria, ribosomes and the nucleus.".into()),
            generation: Some(crate::models::GenerationOptions {
                count: Some(4),
                ..Default::default()
            }),
            source_text_for_concepts: None,
        };
        let (_, Json(material)) = create_material(owner.into(), State(app.state()), Json(request))
            .await
            .unwrap();

        match material.content {
            MaterialContent::Flashcards { cards } => assert_eq!(cards.len(), 4),
            other => panic!("expected flashcards, got {:?}", other),
        }
        assert_eq!(app.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_or_missing_content_is_rejected_before_writing() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let class = app.class_owned_by(owner.id, "Biology").await;

        let mut wrong_shape = quiz_request(&class);
        wrong_shape.content = Some(InlineContent::Flashcards(FlashcardDeck {
            cards: vec![Flashcard {
                front: "a".into(),
                back: "b".into(),
            }],
        }));
        let mut missing = quiz_request(&class);
        missing.content = None;

        for request in [wrong_shape, missing] {
            let result = create_material(owner.clone().into(), State(app.state()), Json(request)).await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
        assert_eq!(app.repo.material_count(), 0);
        assert_eq!(app.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_member_reads_but_cannot_delete() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com", "teacher");
        let member = app.user("member@example.com", "student");
        let class = app.class_owned_by(owner.id, "Biology").await;
        app.join(&class, member.id).await;
        let (_, Json(material)) = create_material(
            owner.clone().into(),
            State(app.state()),
            Json(note_request(&class, None)),
        )
        .await
        .unwrap();

        let Json(read) = get_material(member.clone().into(), State(app.state()), Path(material.id))
            .await
            .unwrap();
        assert!(matches!(read.content, MaterialContent::Note { note: Some(_), .. }));

        let denied = delete_material(member.into(), State(app.state()), Path(material.id)).await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let deleted = delete_material(owner.into(), State(app.state()), Path(material.id))
            .await
            .unwrap();
        assert_eq!(deleted, StatusCode::NO_CONTENT);
        assert_eq!(app.repo.note_count(), 0);
    }
}
