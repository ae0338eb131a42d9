//! Assembly of element contributions into global vectors and CSR matrices.
//!
//! Element evaluation is a parallel map over elements. The reduction into global containers is
//! serial in element order, so results do not depend on the number of threads.

use log::debug;
use nalgebra::{DVector, DVectorViewMut, Vector3};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

use crate::element::{Brick9Evaluation, ElementMatrix, ElementVector, EvaluationRequest, BRICK9_NUM_DOFS};
use crate::error::{ConfigurationError, MeshError};
use crate::mesh::{DofMap, Mesh};
use crate::solid::MaterialPointState;
use crate::sparse::{add_to_csr_entry, zeroed_csr_from_pattern};

/// Global quantities assembled from all elements.
#[derive(Clone, Debug)]
pub struct GlobalEvaluation {
    /// Internal forces (elastic and, if requested, damping) on the free DOFs.
    pub internal_force: DVector<f64>,
    pub stiffness: Option<CsrMatrix<f64>>,
    pub damping: Option<CsrMatrix<f64>>,
    /// Trial material point states per element. Commit with [`Mesh::commit_material_states`].
    pub material_states: Vec<Vec<MaterialPointState<f64>>>,
    pub num_plastic_points: usize,
}

fn evaluate_element(mesh: &Mesh, index: usize, request: EvaluationRequest) -> Result<Brick9Evaluation, MeshError> {
    let material = mesh.element_material(index)?;
    let state = mesh.element_state(index);
    Ok(mesh.elements()[index].evaluate(index, material, &state, request)?)
}

pub fn evaluate_elements(mesh: &Mesh, request: EvaluationRequest) -> Result<Vec<Brick9Evaluation>, MeshError> {
    mesh.require_dof_map("evaluating elements")?;
    (0..mesh.num_elements())
        .map(|index| evaluate_element(mesh, index, request))
        .collect()
}

pub fn evaluate_elements_par(mesh: &Mesh, request: EvaluationRequest) -> Result<Vec<Brick9Evaluation>, MeshError> {
    mesh.require_dof_map("evaluating elements")?;
    (0..mesh.num_elements())
        .into_par_iter()
        .map(|index| evaluate_element(mesh, index, request))
        .collect()
}

/// Adds element vectors into a global vector over the free DOFs.
pub fn assemble_element_vectors_into<'a>(
    mut global: DVectorViewMut<f64>,
    dof_map: &DofMap,
    element_vectors: impl IntoIterator<Item = (usize, &'a ElementVector)>,
) {
    for (element_index, local) in element_vectors {
        for (a, dof) in dof_map.element_dofs(element_index).iter().enumerate() {
            if let Some(dof) = dof {
                global[*dof] += local[a];
            }
        }
    }
}

/// Adds element matrices into a CSR matrix with the sparsity pattern of the DOF map.
pub fn assemble_element_matrices_into_csr<'a>(
    csr: &mut CsrMatrix<f64>,
    dof_map: &DofMap,
    element_matrices: impl IntoIterator<Item = (usize, &'a ElementMatrix)>,
) {
    let (row_offsets, col_indices, values) = csr.csr_data_mut();
    for (element_index, local) in element_matrices {
        let dofs = dof_map.element_dofs(element_index);
        for a in 0..BRICK9_NUM_DOFS {
            let row = match dofs[a] {
                Some(row) => row,
                None => continue,
            };
            for b in 0..BRICK9_NUM_DOFS {
                if let Some(col) = dofs[b] {
                    let found = add_to_csr_entry(row_offsets, col_indices, values, row, col, local[(a, b)]);
                    debug_assert!(found, "element entry ({}, {}) must be part of the pattern", row, col);
                }
            }
        }
    }
}

fn reduce_evaluations(
    dof_map: &DofMap,
    evaluations: Vec<Brick9Evaluation>,
    request: EvaluationRequest,
) -> GlobalEvaluation {
    coarse_prof::profile!("reduce_element_evaluations");
    let mut internal_force = DVector::zeros(dof_map.num_free_dofs());
    assemble_element_vectors_into(
        internal_force.as_view_mut(),
        dof_map,
        evaluations.iter().map(|e| &e.internal_force).enumerate(),
    );

    let assemble_matrix = |select: fn(&Brick9Evaluation) -> Option<&ElementMatrix>| {
        let mut matrix = zeroed_csr_from_pattern(dof_map.sparsity_pattern());
        assemble_element_matrices_into_csr(
            &mut matrix,
            dof_map,
            evaluations
                .iter()
                .enumerate()
                .filter_map(|(i, e)| select(e).map(|m| (i, m))),
        );
        matrix
    };

    let stiffness = if request.stiffness {
        Some(assemble_matrix(|e| e.stiffness.as_ref()))
    } else {
        None
    };
    let damping = if request.damping {
        Some(assemble_matrix(|e| e.damping.as_ref()))
    } else {
        None
    };

    let num_plastic_points = evaluations.iter().map(|e| e.num_plastic_points).sum();
    let material_states = evaluations.into_iter().map(|e| e.material_states).collect();

    GlobalEvaluation {
        internal_force,
        stiffness,
        damping,
        material_states,
        num_plastic_points,
    }
}

/// Evaluates all elements sequentially and assembles the global quantities.
pub fn assemble(mesh: &Mesh, request: EvaluationRequest) -> Result<GlobalEvaluation, MeshError> {
    coarse_prof::profile!("assemble");
    let dof_map = mesh.require_dof_map("assembling")?;
    let evaluations = evaluate_elements(mesh, request)?;
    Ok(reduce_evaluations(dof_map, evaluations, request))
}

/// Evaluates all elements in parallel and assembles the global quantities.
pub fn assemble_par(mesh: &Mesh, request: EvaluationRequest) -> Result<GlobalEvaluation, MeshError> {
    coarse_prof::profile!("assemble_par");
    let dof_map = mesh.require_dof_map("assembling")?;
    let evaluations = {
        coarse_prof::profile!("evaluate_elements_par");
        evaluate_elements_par(mesh, request)?
    };
    let global = reduce_evaluations(dof_map, evaluations, request);
    if global.num_plastic_points > 0 {
        debug!("{} material points are plastic", global.num_plastic_points);
    }
    Ok(global)
}

/// Assembles the consistent mass matrix over the free DOFs.
pub fn assemble_mass_matrix(mesh: &Mesh) -> Result<CsrMatrix<f64>, ConfigurationError> {
    let dof_map = mesh.require_dof_map("assembling the mass matrix")?;
    let mut mass = zeroed_csr_from_pattern(dof_map.sparsity_pattern());
    let element_masses = mesh
        .elements()
        .iter()
        .map(|element| {
            element
                .reference_geometry()
                .map(|geometry| &geometry.mass)
                .ok_or(ConfigurationError::NotSetUp("assembling the mass matrix"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    assemble_element_matrices_into_csr(&mut mass, dof_map, element_masses.into_iter().enumerate());
    Ok(mass)
}

/// Adds gravitational loads of elements that compute their own gravity, and of all other
/// elements if the mesh applies gravity automatically.
pub fn assemble_gravity_forces_into(
    global: DVectorViewMut<f64>,
    mesh: &Mesh,
    gravity: &Vector3<f64>,
) -> Result<(), ConfigurationError> {
    let dof_map = mesh.require_dof_map("assembling gravity forces")?;
    let forces: Vec<(usize, ElementVector)> = mesh
        .elements()
        .iter()
        .enumerate()
        .filter(|(_, element)| element.settings().gravity || mesh.automatic_gravity())
        .filter_map(|(index, element)| {
            element
                .compute_gravity_force(gravity)
                .map(|force| (index, force))
        })
        .collect();
    assemble_element_vectors_into(global, dof_map, forces.iter().map(|(i, f)| (*i, f)));
    Ok(())
}

/// Total applied load: nodal external forces plus gravity.
pub fn assemble_applied_forces(mesh: &Mesh, gravity: &Vector3<f64>) -> Result<DVector<f64>, ConfigurationError> {
    let mut forces = DVector::zeros(mesh.num_free_dofs());
    mesh.gather_external_forces_into(forces.as_view_mut())?;
    assemble_gravity_forces_into(forces.as_view_mut(), mesh, gravity)?;
    Ok(forces)
}

/// Total elastic energy, or `None` if some element has a path-dependent material.
pub fn compute_elastic_energy(mesh: &Mesh) -> Result<Option<f64>, ConfigurationError> {
    let mut energy = 0.0;
    for (index, element) in mesh.elements().iter().enumerate() {
        let material = mesh.element_material(index)?;
        let state = mesh.element_state(index);
        match element.compute_elastic_energy(material, &state.positions) {
            Some(element_energy) => energy += element_energy,
            None => return Ok(None),
        }
    }
    Ok(Some(energy))
}
