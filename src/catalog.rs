//! Catalog service: thin validated CRUD over categories and products.

use std::sync::Arc;

use validator::Validate;

use crate::store::CatalogStore;
use crate::{CatalogError, Category, NewCategory, NewProduct, Product};

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        Ok(self.store.list_categories().await?)
    }

    pub async fn category(&self, id: i32) -> Result<Category, CatalogError> {
        self.store.get_category(id).await?.ok_or(CatalogError::NotFound { entity: "category", id })
    }

    pub async fn create_category(&self, category: NewCategory) -> Result<Category, CatalogError> {
        check(&category)?;
        Ok(self.store.create_category(&category).await?)
    }

    pub async fn update_category(&self, id: i32, category: NewCategory) -> Result<Category, CatalogError> {
        check(&category)?;
        self.store
            .update_category(id, &category)
            .await?
            .ok_or(CatalogError::NotFound { entity: "category", id })
    }

    pub async fn delete_category(&self, id: i32) -> Result<(), CatalogError> {
        if self.store.delete_category(id).await? { Ok(()) } else { Err(CatalogError::NotFound { entity: "category", id }) }
    }

    pub async fn products(&self) -> Result<Vec<Product>, CatalogError> {
        Ok(self.store.list_products().await?)
    }

    pub async fn product(&self, id: i32) -> Result<Product, CatalogError> {
        self.store.get_product(id).await?.ok_or(CatalogError::NotFound { entity: "product", id })
    }

    pub async fn create_product(&self, product: NewProduct) -> Result<Product, CatalogError> {
        let product = normalize(product);
        check(&product)?;
        Ok(self.store.create_product(&product).await?)
    }

    pub async fn update_product(&self, id: i32, product: NewProduct) -> Result<Product, CatalogError> {
        let product = normalize(product);
        check(&product)?;
        self.store
            .update_product(id, &product)
            .await?
            .ok_or(CatalogError::NotFound { entity: "product", id })
    }

    pub async fn delete_product(&self, id: i32) -> Result<(), CatalogError> {
        if self.store.delete_product(id).await? { Ok(()) } else { Err(CatalogError::NotFound { entity: "product", id }) }
    }
}

fn check(input: &impl Validate) -> Result<(), CatalogError> {
    input.validate().map_err(|e| CatalogError::Invalid(e.to_string()))
}

/// Category id 0 means "no category".
fn normalize(mut product: NewProduct) -> NewProduct {
    product.name = product.name.trim().to_string();
    product.category_id = product.category_id.filter(|id| *id > 0);
    product
}
