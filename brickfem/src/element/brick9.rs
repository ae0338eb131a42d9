use itertools::izip;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::material::{Material, MaterialHandle};
use crate::node::NodeHandle;
use crate::quadrature::{hex_quadrature_strength_3, hex_quadrature_strength_5, Quadrature};
use crate::solid::materials::{HenckyMaterial, StVKMaterial};
use crate::solid::plasticity::PlasticityModel;
use crate::solid::{contract_stress_derivative, ConstitutiveModel, MaterialPointState, Matrix9, StressUpdate};

/// Number of shape functions: 8 trilinear corner functions and 3 quadratic curvature functions.
pub const BRICK9_NUM_SHAPE_FUNCTIONS: usize = 11;
/// Number of scalar degrees of freedom of a single element.
pub const BRICK9_NUM_DOFS: usize = 3 * BRICK9_NUM_SHAPE_FUNCTIONS;

pub type ElementVector = SVector<f64, BRICK9_NUM_DOFS>;
pub type ElementMatrix = SMatrix<f64, BRICK9_NUM_DOFS, BRICK9_NUM_DOFS>;
/// Nodal quantities of an element, one column per shape function.
pub type ElementNodalMatrix = SMatrix<f64, 3, BRICK9_NUM_SHAPE_FUNCTIONS>;

/// Reference coordinates of the corners. The first four corners form the bottom face (`zeta = -1`)
/// in counter-clockwise order when viewed from above, the last four the top face.
pub const BRICK9_CORNERS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrainFormulation {
    GreenLagrange,
    Hencky,
}

impl Default for StrainFormulation {
    fn default() -> Self {
        StrainFormulation::GreenLagrange
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Brick9Settings {
    /// Coefficient of the stiffness-proportional (Kelvin-Voigt) structural damping.
    pub alpha_damping: f64,
    /// Whether the element computes its own gravitational load.
    pub gravity: bool,
    pub strain: StrainFormulation,
    pub plasticity: Option<PlasticityModel<f64>>,
}

impl Default for Brick9Settings {
    fn default() -> Self {
        Self {
            alpha_damping: 0.0,
            gravity: false,
            strain: StrainFormulation::GreenLagrange,
            plasticity: None,
        }
    }
}

impl Brick9Settings {
    pub fn set_alpha_damping(mut self, alpha_damping: f64) -> Self {
        self.alpha_damping = alpha_damping;
        self
    }

    pub fn set_gravity(mut self, gravity: bool) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn set_hencky_strain(mut self, hencky: bool) -> Self {
        self.strain = if hencky {
            StrainFormulation::Hencky
        } else {
            StrainFormulation::GreenLagrange
        };
        self
    }

    pub fn set_plasticity(mut self, plasticity: Option<PlasticityModel<f64>>) -> Self {
        self.plasticity = plasticity;
        self
    }
}

/// Evaluates the 11 shape functions at reference coordinates `xi`.
pub fn brick9_shape_functions(dimensions: &Vector3<f64>, xi: &Vector3<f64>) -> SVector<f64, BRICK9_NUM_SHAPE_FUNCTIONS> {
    let mut n = SVector::zeros();
    for (k, corner) in BRICK9_CORNERS.iter().enumerate() {
        n[k] = 0.125 * (1.0 + xi.x * corner[0]) * (1.0 + xi.y * corner[1]) * (1.0 + xi.z * corner[2]);
    }
    for d in 0..3 {
        n[8 + d] = dimensions[d] * dimensions[d] / 8.0 * (xi[d] * xi[d] - 1.0);
    }
    n
}

/// Evaluates the reference gradients of the shape functions. Column `k` holds `dN_k / dxi`.
pub fn brick9_shape_function_gradients(dimensions: &Vector3<f64>, xi: &Vector3<f64>) -> ElementNodalMatrix {
    let mut gradients = ElementNodalMatrix::zeros();
    for (k, c) in BRICK9_CORNERS.iter().enumerate() {
        let (fx, fy, fz) = (1.0 + xi.x * c[0], 1.0 + xi.y * c[1], 1.0 + xi.z * c[2]);
        gradients[(0, k)] = 0.125 * c[0] * fy * fz;
        gradients[(1, k)] = 0.125 * fx * c[1] * fz;
        gradients[(2, k)] = 0.125 * fx * fy * c[2];
    }
    for d in 0..3 {
        gradients[(d, 8 + d)] = dimensions[d] * dimensions[d] / 4.0 * xi[d];
    }
    gradients
}

/// Per-quadrature-point data of the undeformed element, at the points of the stress quadrature.
#[derive(Clone, Debug, PartialEq)]
pub struct Brick9ReferenceGeometry {
    /// Quadrature weight times the reference Jacobian determinant.
    pub volume_weights: Vec<f64>,
    /// Material gradients `G_k = J0^{-T} dN_k/dxi`, one column per shape function.
    pub material_gradients: Vec<ElementNodalMatrix>,
    /// Consistent mass matrix.
    pub mass: ElementMatrix,
    /// Integrals of `rho N_k` over the element.
    pub mass_moments: SVector<f64, BRICK9_NUM_SHAPE_FUNCTIONS>,
}

impl Brick9ReferenceGeometry {
    pub fn volume(&self) -> f64 {
        self.volume_weights.iter().sum()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.volume_weights.len()
    }
}

/// Current nodal state of an element, one column per shape function.
#[derive(Clone, Debug, PartialEq)]
pub struct Brick9State {
    pub positions: ElementNodalMatrix,
    pub velocities: ElementNodalMatrix,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub stiffness: bool,
    /// Include damping forces in the internal force and compute the damping matrix.
    pub damping: bool,
}

impl EvaluationRequest {
    pub fn force_only() -> Self {
        Self::default()
    }

    pub fn static_tangent() -> Self {
        Self {
            stiffness: true,
            damping: false,
        }
    }

    pub fn dynamic_tangent() -> Self {
        Self {
            stiffness: true,
            damping: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Brick9Evaluation {
    /// Internal (elastic plus damping) force, in local DOF ordering.
    pub internal_force: ElementVector,
    pub stiffness: Option<ElementMatrix>,
    pub damping: Option<ElementMatrix>,
    /// Updated material point states, to be committed once the enclosing solve converges.
    pub material_states: Vec<MaterialPointState<f64>>,
    pub num_plastic_points: usize,
}

/// Constitutive law used by an element, selected by its strain formulation.
#[derive(Copy, Clone, Debug, PartialEq)]
enum ElementModel {
    GreenLagrange(StVKMaterial<f64>),
    Hencky(HenckyMaterial<f64>),
}

impl ConstitutiveModel<f64> for ElementModel {
    fn is_path_dependent(&self) -> bool {
        match self {
            ElementModel::GreenLagrange(model) => model.is_path_dependent(),
            ElementModel::Hencky(model) => model.is_path_dependent(),
        }
    }

    fn compute_stress_tensor(&self, f: &Matrix3<f64>, state: &MaterialPointState<f64>) -> StressUpdate<f64> {
        match self {
            ElementModel::GreenLagrange(model) => model.compute_stress_tensor(f, state),
            ElementModel::Hencky(model) => model.compute_stress_tensor(f, state),
        }
    }

    fn compute_stress_derivative(&self, f: &Matrix3<f64>, state: &MaterialPointState<f64>) -> Matrix9<f64> {
        match self {
            ElementModel::GreenLagrange(model) => model.compute_stress_derivative(f, state),
            ElementModel::Hencky(model) => model.compute_stress_derivative(f, state),
        }
    }
}

/// The 9-node large-deformation brick.
///
/// The position field is interpolated trilinearly from the 8 corner nodes and enriched by the
/// three curvature vectors of the curvature node, which lets a single layer of bricks bend like
/// a shell. The formulation is total Lagrangian.
#[derive(Clone, Debug, PartialEq)]
pub struct Brick9Element {
    corners: [NodeHandle; 8],
    curvature: NodeHandle,
    dimensions: Vector3<f64>,
    material: Option<MaterialHandle>,
    settings: Brick9Settings,
    reference: Option<Brick9ReferenceGeometry>,
    material_states: Vec<MaterialPointState<f64>>,
}

impl Brick9Element {
    pub fn new(corners: [NodeHandle; 8], curvature: NodeHandle, dimensions: Vector3<f64>) -> Self {
        Self {
            corners,
            curvature,
            dimensions,
            material: None,
            settings: Brick9Settings::default(),
            reference: None,
            material_states: Vec::new(),
        }
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_settings(mut self, settings: Brick9Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn corners(&self) -> &[NodeHandle; 8] {
        &self.corners
    }

    pub fn curvature_node(&self) -> NodeHandle {
        self.curvature
    }

    /// Node owning the degrees of freedom of shape function `k`, and the offset of
    /// those degrees of freedom within the node.
    pub fn shape_function_node(&self, k: usize) -> (NodeHandle, usize) {
        if k < 8 {
            (self.corners[k], 0)
        } else {
            (self.curvature, 3 * (k - 8))
        }
    }

    pub fn dimensions(&self) -> &Vector3<f64> {
        &self.dimensions
    }

    pub fn material(&self) -> Option<MaterialHandle> {
        self.material
    }

    pub fn settings(&self) -> &Brick9Settings {
        &self.settings
    }

    pub fn reference_geometry(&self) -> Option<&Brick9ReferenceGeometry> {
        self.reference.as_ref()
    }

    pub fn material_states(&self) -> &[MaterialPointState<f64>] {
        &self.material_states
    }

    /// Accepts the material point states of a converged evaluation.
    pub fn commit_material_states(&mut self, states: &[MaterialPointState<f64>]) {
        self.material_states.clear();
        self.material_states.extend_from_slice(states);
    }

    fn constitutive_model(&self, material: &Material) -> ElementModel {
        match self.settings.strain {
            StrainFormulation::GreenLagrange => {
                ElementModel::GreenLagrange(StVKMaterial::from_voigt_elasticity(*material.elasticity_tensor()))
            }
            StrainFormulation::Hencky => ElementModel::Hencky(HenckyMaterial {
                lame: material.lame_parameters(),
                plasticity: self.settings.plasticity,
            }),
        }
    }

    /// Computes the reference geometry and consistent mass of the element.
    ///
    /// `reference_positions` holds the undeformed nodal quantities, one column per shape function.
    pub fn compute_reference_geometry(
        &self,
        element_index: usize,
        reference_positions: &ElementNodalMatrix,
        material: &Material,
    ) -> Result<Brick9ReferenceGeometry, GeometryError> {
        integrate_reference_geometry(
            element_index,
            &self.dimensions,
            reference_positions,
            material.density(),
            &hex_quadrature_strength_3(),
            &hex_quadrature_strength_5(),
        )
    }

    /// Stores the reference geometry and resets all material points to their initial state.
    pub fn set_reference_geometry(&mut self, geometry: Brick9ReferenceGeometry) {
        self.material_states = vec![MaterialPointState::default(); geometry.num_quadrature_points()];
        self.reference = Some(geometry);
    }

    /// Consistent gravitational load `int rho N_k g dV`.
    pub fn compute_gravity_force(&self, gravity: &Vector3<f64>) -> Option<ElementVector> {
        let reference = self.reference.as_ref()?;
        let mut force = ElementVector::zeros();
        for k in 0..BRICK9_NUM_SHAPE_FUNCTIONS {
            for i in 0..3 {
                force[3 * k + i] = reference.mass_moments[k] * gravity[i];
            }
        }
        Some(force)
    }

    /// Elastic energy for path-independent models, `None` for plastic elements or before setup.
    pub fn compute_elastic_energy(&self, material: &Material, positions: &ElementNodalMatrix) -> Option<f64> {
        let reference = self.reference.as_ref()?;
        let model = self.constitutive_model(material);
        if model.is_path_dependent() {
            return None;
        }

        let mut energy = 0.0;
        for (dv, g) in izip!(&reference.volume_weights, &reference.material_gradients) {
            let f = positions * g.transpose();
            let density = match model {
                ElementModel::GreenLagrange(stvk) => stvk.compute_strain_energy_density(&f),
                ElementModel::Hencky(hencky) => hencky_energy_density(&hencky, &f)?,
            };
            energy += dv * density;
        }
        Some(energy)
    }

    /// Evaluates internal force and, on request, tangent stiffness and damping matrices.
    ///
    /// # Panics
    ///
    /// Panics if the reference geometry has not been set up.
    #[allow(non_snake_case)]
    pub fn evaluate(
        &self,
        element_index: usize,
        material: &Material,
        state: &Brick9State,
        request: EvaluationRequest,
    ) -> Result<Brick9Evaluation, GeometryError> {
        let reference = self
            .reference
            .as_ref()
            .expect("reference geometry must be set up before evaluating an element");

        if !state.positions.iter().all(|x| x.is_finite()) || !state.velocities.iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFiniteState { element: element_index });
        }

        let model = self.constitutive_model(material);
        let structural_damping = request.damping && self.settings.alpha_damping > 0.0;
        let rayleigh = material.rayleigh_damping();
        let need_stiffness = request.stiffness || (request.damping && rayleigh.stiffness > 0.0);
        let elasticity = material.elasticity_tensor();

        let mut forces = ElementNodalMatrix::zeros();
        let mut stiffness = ElementMatrix::zeros();
        let mut damping = ElementMatrix::zeros();
        let mut material_states = Vec::with_capacity(reference.num_quadrature_points());
        let mut num_plastic_points = 0;

        for (q, (dv, G)) in izip!(&reference.volume_weights, &reference.material_gradients).enumerate() {
            let F = state.positions * G.transpose();
            let det_F = F.determinant();
            if !det_F.is_finite() {
                return Err(GeometryError::NonFiniteState { element: element_index });
            }
            if det_F <= 0.0 {
                return Err(GeometryError::InvertedElement {
                    element: element_index,
                    determinant: det_F,
                });
            }

            let committed = self.material_states.get(q).copied().unwrap_or_default();
            let update = model.compute_stress_tensor(&F, &committed);
            if !update.stress.iter().all(|p| p.is_finite()) {
                return Err(GeometryError::NonFiniteState { element: element_index });
            }
            if update.plastic {
                num_plastic_points += 1;
            }
            material_states.push(update.state);

            forces += update.stress * G * *dv;

            if need_stiffness {
                let dp_df = model.compute_stress_derivative(&F, &committed);
                let dp_df = (dp_df + dp_df.transpose()) * 0.5;
                add_contracted_blocks(&mut stiffness, &dp_df, G, *dv);
            }

            if structural_damping {
                let B = strain_displacement_matrices(&F, G);
                let alpha_d = elasticity * self.settings.alpha_damping;
                let mut strain_rate = SVector::<f64, 6>::zeros();
                for (k, B_k) in B.iter().enumerate() {
                    strain_rate += B_k * state.velocities.column(k);
                }
                let damping_stress = alpha_d * strain_rate;
                for (k, B_k) in B.iter().enumerate() {
                    let mut column = forces.column_mut(k);
                    column += B_k.transpose() * damping_stress * *dv;
                }
                for (k, B_k) in B.iter().enumerate() {
                    let B_k_D = B_k.transpose() * alpha_d * *dv;
                    for (l, B_l) in B.iter().enumerate().skip(k) {
                        let block = B_k_D * B_l;
                        add_symmetric_block(&mut damping, k, l, &block);
                    }
                }
            }
        }

        let mut internal_force = ElementVector::from_column_slice(forces.as_slice());

        if request.damping && (rayleigh.mass > 0.0 || rayleigh.stiffness > 0.0) {
            let rayleigh_damping = reference.mass * rayleigh.mass + stiffness * rayleigh.stiffness;
            // Structural damping forces are already part of `forces`
            let v = ElementVector::from_column_slice(state.velocities.as_slice());
            internal_force += rayleigh_damping * v;
            damping += rayleigh_damping;
        }

        Ok(Brick9Evaluation {
            internal_force,
            stiffness: if request.stiffness { Some(stiffness) } else { None },
            damping: if request.damping { Some(damping) } else { None },
            material_states,
            num_plastic_points,
        })
    }
}

fn add_symmetric_block(matrix: &mut ElementMatrix, k: usize, l: usize, block: &Matrix3<f64>) {
    let mut upper = matrix.fixed_view_mut::<3, 3>(3 * k, 3 * l);
    upper += block;
    if k != l {
        let mut lower = matrix.fixed_view_mut::<3, 3>(3 * l, 3 * k);
        lower += block.transpose();
    }
}

/// Adds `dv * contraction(dP/dF, G_k, G_l)` for all pairs of shape functions, assuming the
/// stress derivative has major symmetry.
fn add_contracted_blocks(stiffness: &mut ElementMatrix, dp_df: &Matrix9<f64>, gradients: &ElementNodalMatrix, dv: f64) {
    for k in 0..BRICK9_NUM_SHAPE_FUNCTIONS {
        let g_k = gradients.column(k).clone_owned();
        for l in k..BRICK9_NUM_SHAPE_FUNCTIONS {
            let g_l = gradients.column(l).clone_owned();
            let block = contract_stress_derivative(dp_df, &g_k, &g_l) * dv;
            add_symmetric_block(stiffness, k, l, &block);
        }
    }
}

/// Voigt strain-displacement matrices `B_k` with `sym(F^T dF) = sum_k B_k dx_k` for `dF = dx_k G_k^T`.
#[allow(non_snake_case)]
fn strain_displacement_matrices(
    F: &Matrix3<f64>,
    gradients: &ElementNodalMatrix,
) -> [SMatrix<f64, 6, 3>; BRICK9_NUM_SHAPE_FUNCTIONS] {
    let mut result = [SMatrix::<f64, 6, 3>::zeros(); BRICK9_NUM_SHAPE_FUNCTIONS];
    for (k, B_k) in result.iter_mut().enumerate() {
        let g = gradients.column(k);
        for j in 0..3 {
            B_k[(0, j)] = F[(j, 0)] * g[0];
            B_k[(1, j)] = F[(j, 1)] * g[1];
            B_k[(2, j)] = F[(j, 2)] * g[2];
            B_k[(3, j)] = F[(j, 0)] * g[1] + F[(j, 1)] * g[0];
            B_k[(4, j)] = F[(j, 0)] * g[2] + F[(j, 2)] * g[0];
            B_k[(5, j)] = F[(j, 1)] * g[2] + F[(j, 2)] * g[1];
        }
    }
    result
}

#[allow(non_snake_case)]
fn hencky_energy_density(material: &HenckyMaterial<f64>, F: &Matrix3<f64>) -> Option<f64> {
    let b = F * F.transpose();
    let eigenvalues = nalgebra::SymmetricEigen::new(b).eigenvalues;
    if eigenvalues.iter().any(|b_i| *b_i <= 0.0) {
        return None;
    }
    let eps = eigenvalues.map(|b_i| 0.5 * b_i.ln());
    let trace = eps.sum();
    Some(material.lame.mu * eps.norm_squared() + 0.5 * material.lame.lambda * trace * trace)
}

/// Computes the reference geometry of an element.
///
/// Internal forces, stiffness and damping are integrated with `stress_quadrature`, mass and
/// gravity with `mass_quadrature`. The 2x2x2 Gauss rule for the stress terms avoids the
/// transverse shear locking that the full 3x3x3 rule exhibits for thin bricks in bending.
pub fn integrate_reference_geometry(
    element_index: usize,
    dimensions: &Vector3<f64>,
    reference_positions: &ElementNodalMatrix,
    density: f64,
    stress_quadrature: impl Quadrature,
    mass_quadrature: impl Quadrature,
) -> Result<Brick9ReferenceGeometry, GeometryError> {
    let n = stress_quadrature.len();
    let mut geometry = Brick9ReferenceGeometry {
        volume_weights: Vec::with_capacity(n),
        material_gradients: Vec::with_capacity(n),
        mass: ElementMatrix::zeros(),
        mass_moments: SVector::zeros(),
    };

    for (w, xi) in izip!(stress_quadrature.weights(), stress_quadrature.points()) {
        let dn_dxi = brick9_shape_function_gradients(dimensions, xi);
        let j0 = reference_positions * dn_dxi.transpose();
        let (det_j0, j0_inv_t) = reference_jacobian(element_index, &j0)?;
        geometry.volume_weights.push(w * det_j0);
        geometry.material_gradients.push(j0_inv_t * dn_dxi);
    }

    for (w, xi) in izip!(mass_quadrature.weights(), mass_quadrature.points()) {
        let dn_dxi = brick9_shape_function_gradients(dimensions, xi);
        let j0 = reference_positions * dn_dxi.transpose();
        let (det_j0, _) = reference_jacobian(element_index, &j0)?;
        let shape_functions = brick9_shape_functions(dimensions, xi);
        let dv = w * det_j0;

        for k in 0..BRICK9_NUM_SHAPE_FUNCTIONS {
            geometry.mass_moments[k] += density * shape_functions[k] * dv;
            for l in k..BRICK9_NUM_SHAPE_FUNCTIONS {
                let m_kl = density * shape_functions[k] * shape_functions[l] * dv;
                add_symmetric_block(&mut geometry.mass, k, l, &(Matrix3::identity() * m_kl));
            }
        }
    }

    Ok(geometry)
}

/// Determinant and inverse transpose of a reference Jacobian, rejecting non-positive determinants.
fn reference_jacobian(element_index: usize, j0: &Matrix3<f64>) -> Result<(f64, Matrix3<f64>), GeometryError> {
    let det_j0 = j0.determinant();
    if !(det_j0 > 0.0) {
        return Err(GeometryError::NonPositiveJacobian {
            element: element_index,
            determinant: det_j0,
        });
    }
    let j0_inv = j0.try_inverse().ok_or(GeometryError::NonPositiveJacobian {
        element: element_index,
        determinant: det_j0,
    })?;
    Ok((det_j0, j0_inv.transpose()))
}
