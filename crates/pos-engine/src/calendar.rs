use crate::{int_key, Engine, EngineError};
use chrono::NaiveDate;
use pos_core::calendar::{next_block, sort_blocks};
use pos_core::{BlockTime, CalendarBlock, DayTemplate, TemplateBlock};
use pos_storage::schema::{CALENDAR_BLOCKS, DAY_TEMPLATES};
use pos_storage::TxMode;
use serde_json::json;
use tracing::info;

impl Engine {
    pub fn add_block(
        &mut self,
        date: NaiveDate,
        start: &str,
        end: &str,
        title: &str,
    ) -> Result<CalendarBlock, EngineError> {
        self.guard_block_day(date, "add_block")?;
        let mut block = CalendarBlock::new(date, BlockTime::parse(start)?, BlockTime::parse(end)?, title)?;
        let key = self
            .store
            .run_transaction(&[CALENDAR_BLOCKS], TxMode::ReadWrite, |tx| {
                tx.add_as(CALENDAR_BLOCKS, &block)
            })?;
        block.id = Some(int_key(key)?);
        Ok(block)
    }

    /// Replaces an existing block. Both the old and the new date must be
    /// writable.
    pub fn update_block(&mut self, mut block: CalendarBlock) -> Result<CalendarBlock, EngineError> {
        let id = block
            .id
            .ok_or_else(|| EngineError::Invalid("block id is required".to_string()))?;
        block.title = block.title.trim().to_string();
        block.validate()?;
        let existing = self
            .get_block(id)?
            .ok_or_else(|| EngineError::not_found(CALENDAR_BLOCKS, id))?;
        self.guard_block_day(existing.date, "update_block")?;
        self.guard_block_day(block.date, "update_block")?;
        self.store
            .run_transaction(&[CALENDAR_BLOCKS], TxMode::ReadWrite, |tx| {
                tx.put_as(CALENDAR_BLOCKS, &block)
            })?;
        Ok(block)
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete_block(&mut self, id: i64) -> Result<bool, EngineError> {
        let Some(existing) = self.get_block(id)? else {
            return Ok(false);
        };
        self.guard_block_day(existing.date, "delete_block")?;
        Ok(self
            .store
            .run_transaction(&[CALENDAR_BLOCKS], TxMode::ReadWrite, |tx| {
                tx.delete(CALENDAR_BLOCKS, id)
            })?)
    }

    pub fn get_block(&mut self, id: i64) -> Result<Option<CalendarBlock>, EngineError> {
        Ok(self
            .store
            .run_transaction(&[CALENDAR_BLOCKS], TxMode::ReadOnly, |tx| {
                tx.get_as(CALENDAR_BLOCKS, id)
            })?)
    }

    /// Blocks of `date` ordered by start time.
    pub fn list_blocks(&mut self, date: NaiveDate) -> Result<Vec<CalendarBlock>, EngineError> {
        let mut blocks: Vec<CalendarBlock> = self
            .store
            .run_transaction(&[CALENDAR_BLOCKS], TxMode::ReadOnly, |tx| {
                tx.query_by_field_as(CALENDAR_BLOCKS, "date", &json!(date))
            })?;
        sort_blocks(&mut blocks);
        Ok(blocks)
    }

    /// Today's first block that has not started yet, by the clock's time of
    /// day.
    pub fn get_next_block(&mut self) -> Result<Option<CalendarBlock>, EngineError> {
        let now = BlockTime::from_time(self.clock.time_of_day());
        let blocks = self.list_blocks(self.today())?;
        Ok(next_block(&blocks, now).cloned())
    }

    pub fn add_template(
        &mut self,
        name: &str,
        blocks: Vec<TemplateBlock>,
    ) -> Result<DayTemplate, EngineError> {
        let mut template = DayTemplate {
            id: None,
            name: name.trim().to_string(),
            blocks,
        };
        template.validate()?;
        let key = self
            .store
            .run_transaction(&[DAY_TEMPLATES], TxMode::ReadWrite, |tx| {
                tx.add_as(DAY_TEMPLATES, &template)
            })?;
        template.id = Some(int_key(key)?);
        Ok(template)
    }

    pub fn update_template(&mut self, mut template: DayTemplate) -> Result<DayTemplate, EngineError> {
        let id = template
            .id
            .ok_or_else(|| EngineError::Invalid("template id is required".to_string()))?;
        template.name = template.name.trim().to_string();
        template.validate()?;
        self.store
            .run_transaction(&[DAY_TEMPLATES], TxMode::ReadWrite, |tx| {
                if tx.get(DAY_TEMPLATES, id)?.is_none() {
                    return Err(EngineError::not_found(DAY_TEMPLATES, id));
                }
                tx.put_as(DAY_TEMPLATES, &template)?;
                Ok(())
            })?;
        Ok(template)
    }

    pub fn delete_template(&mut self, id: i64) -> Result<bool, EngineError> {
        Ok(self
            .store
            .run_transaction(&[DAY_TEMPLATES], TxMode::ReadWrite, |tx| {
                tx.delete(DAY_TEMPLATES, id)
            })?)
    }

    pub fn get_template(&mut self, id: i64) -> Result<Option<DayTemplate>, EngineError> {
        Ok(self
            .store
            .run_transaction(&[DAY_TEMPLATES], TxMode::ReadOnly, |tx| {
                tx.get_as(DAY_TEMPLATES, id)
            })?)
    }

    /// Templates ordered by name.
    pub fn list_templates(&mut self) -> Result<Vec<DayTemplate>, EngineError> {
        let mut templates: Vec<DayTemplate> = self
            .store
            .run_transaction(&[DAY_TEMPLATES], TxMode::ReadOnly, |tx| {
                tx.get_all_as(DAY_TEMPLATES)
            })?;
        templates.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(templates)
    }

    /// Adds every block of the template to `date`. Existing blocks stay.
    pub fn apply_template(&mut self, id: i64, date: NaiveDate) -> Result<Vec<CalendarBlock>, EngineError> {
        self.guard_block_day(date, "apply_template")?;
        let created = self.store.run_transaction(
            &[DAY_TEMPLATES, CALENDAR_BLOCKS],
            TxMode::ReadWrite,
            |tx| {
                let template = tx
                    .get_as::<DayTemplate>(DAY_TEMPLATES, id)?
                    .ok_or_else(|| EngineError::not_found(DAY_TEMPLATES, id))?;
                template.validate()?;
                let mut created = Vec::with_capacity(template.blocks.len());
                for template_block in &template.blocks {
                    let mut block = template_block.on(date);
                    block.id = Some(int_key(tx.add_as(CALENDAR_BLOCKS, &block)?)?);
                    created.push(block);
                }
                Ok::<_, EngineError>(created)
            },
        )?;
        info!(
            event = "template_applied",
            template = id,
            day = %date,
            blocks = created.len()
        );
        Ok(created)
    }

    /// Blocks of the current day freeze once the day is closed.
    fn guard_block_day(&self, date: NaiveDate, operation: &'static str) -> Result<(), EngineError> {
        if date == self.today() {
            self.require_phase(!self.is_read_only(), operation)?;
        }
        Ok(())
    }
}
