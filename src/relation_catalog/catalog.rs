//! Closed relation catalog
//!
//! Registration happens in one explicit phase through [`CatalogBuilder`];
//! `build()` validates the whole set and returns an immutable
//! [`RelationCatalog`]. Nothing is discovered lazily while queries run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::entity::EntityDescriptor;
use super::errors::CatalogError;
use super::relation::{Direction, RelationDescriptor, ResolvedRelation};

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn add_entity(&mut self, entity: EntityDescriptor) {
        self.entities.push(entity);
    }

    pub fn add_relation(&mut self, relation: RelationDescriptor) {
        self.relations.push(relation);
    }

    /// Validate every registration and freeze the catalog.
    pub fn build(self) -> Result<RelationCatalog, CatalogError> {
        let mut entities: HashMap<String, Arc<EntityDescriptor>> = HashMap::new();
        for entity in self.entities {
            if entity.primary_key.is_empty() {
                return Err(CatalogError::MissingPrimaryKey {
                    entity: entity.name,
                });
            }
            for pk in &entity.primary_key {
                if !entity.has_field(pk) {
                    return Err(CatalogError::UnknownField {
                        entity: entity.name.clone(),
                        field: pk.clone(),
                    });
                }
            }
            if entities.contains_key(&entity.name) {
                return Err(CatalogError::DuplicateEntity {
                    entity: entity.name,
                });
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        let mut forward: HashMap<String, Vec<usize>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<usize>> = HashMap::new();
        let mut relation_names: HashSet<(String, String)> = HashSet::new();
        let mut related_names: HashSet<(String, String)> = HashSet::new();

        for (idx, relation) in self.relations.iter().enumerate() {
            check_field(&entities, &relation.owner, &relation.owner_field)?;
            check_field(&entities, &relation.target, &relation.target_field)?;

            if !relation_names.insert((relation.owner.clone(), relation.relation_name.clone())) {
                return Err(CatalogError::DuplicateRelationName {
                    owner: relation.owner.clone(),
                    relation_name: relation.relation_name.clone(),
                });
            }
            if !related_names.insert((relation.target.clone(), relation.related_name.clone())) {
                return Err(CatalogError::DuplicateRelatedName {
                    target: relation.target.clone(),
                    related_name: relation.related_name.clone(),
                });
            }

            forward.entry(relation.owner.clone()).or_default().push(idx);
            reverse.entry(relation.target.clone()).or_default().push(idx);
        }

        log::debug!(
            "Relation catalog built: {} entities, {} relations",
            entities.len(),
            self.relations.len()
        );

        Ok(RelationCatalog {
            entities,
            relations: self.relations,
            forward,
            reverse,
        })
    }
}

fn check_field(
    entities: &HashMap<String, Arc<EntityDescriptor>>,
    entity: &str,
    field: &str,
) -> Result<(), CatalogError> {
    let descriptor = entities.get(entity).ok_or_else(|| CatalogError::UnknownEntity {
        entity: entity.to_string(),
    })?;
    if !descriptor.has_field(field) {
        return Err(CatalogError::UnknownField {
            entity: entity.to_string(),
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Immutable per-entity map of forward and reverse relations.
#[derive(Debug, Clone)]
pub struct RelationCatalog {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    relations: Vec<RelationDescriptor>,
    /// owner entity -> indices into `relations`
    forward: HashMap<String, Vec<usize>>,
    /// target entity -> indices into `relations`
    reverse: HashMap<String, Vec<usize>>,
}

impl RelationCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityDescriptor>, CatalogError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    /// Relations owned by `model` (it holds the foreign key).
    pub fn forward_relations(&self, model: &str) -> impl Iterator<Item = &RelationDescriptor> {
        self.indices(&self.forward, model)
    }

    /// Relations whose foreign key points at `model`.
    pub fn reverse_relations(&self, model: &str) -> impl Iterator<Item = &RelationDescriptor> {
        self.indices(&self.reverse, model)
    }

    fn indices<'a>(
        &'a self,
        map: &'a HashMap<String, Vec<usize>>,
        model: &str,
    ) -> impl Iterator<Item = &'a RelationDescriptor> {
        map.get(model)
            .into_iter()
            .flatten()
            .map(move |idx| &self.relations[*idx])
    }

    /// Resolve a join edge named `name` on `model`.
    ///
    /// The name is matched against the forward relation names owned by the
    /// model and the related names of relations pointing at it. Exactly one
    /// match is required.
    pub fn resolve(&self, model: &str, name: &str) -> Result<ResolvedRelation, CatalogError> {
        if !self.entities.contains_key(model) {
            return Err(CatalogError::UnknownEntity {
                entity: model.to_string(),
            });
        }

        let mut candidates: Vec<ResolvedRelation> = self
            .forward_relations(model)
            .filter(|r| r.relation_name == name)
            .map(|r| ResolvedRelation {
                descriptor: r.clone(),
                direction: Direction::Forward,
            })
            .collect();
        candidates.extend(
            self.reverse_relations(model)
                .filter(|r| r.related_name == name)
                .map(|r| ResolvedRelation {
                    descriptor: r.clone(),
                    direction: Direction::Reverse,
                }),
        );

        match candidates.len() {
            0 => Err(CatalogError::RelationNotFound {
                model: model.to_string(),
                name: name.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            n => Err(CatalogError::AmbiguousRelation {
                model: model.to_string(),
                name: name.to_string(),
                candidates: n,
            }),
        }
    }

    /// [`resolve`](Self::resolve), additionally checking that the joined node
    /// is scoped to the entity at the other end of the relation.
    pub fn resolve_edge(
        &self,
        parent_model: &str,
        name: &str,
        child_model: &str,
    ) -> Result<ResolvedRelation, CatalogError> {
        let resolved = self.resolve(parent_model, name)?;
        if resolved.child_model() != child_model {
            return Err(CatalogError::RelationModelMismatch {
                model: parent_model.to_string(),
                name: name.to_string(),
                expected: resolved.child_model().to_string(),
                found: child_model.to_string(),
            });
        }
        Ok(resolved)
    }
}
